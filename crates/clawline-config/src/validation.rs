//! Configuration validation

use crate::schema::RawConfig;
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("[{section}] {field} must be greater than zero")]
    MustBePositive {
        section: &'static str,
        field: &'static str,
    },

    #[error("grab_finish_ms ({grab_ms}ms) must be shorter than credit_seconds ({credit_ms}ms)")]
    GrabWindowTooLong { grab_ms: u64, credit_ms: u64 },

    #[error("[actuator] {0}")]
    ActuatorError(String),
}

/// Validate a raw configuration
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let positive = |value: Option<u64>, section, field, errors: &mut Vec<ValidationError>| {
        if value == Some(0) {
            errors.push(ValidationError::MustBePositive { section, field });
        }
    };

    positive(config.service.heartbeat_seconds, "service", "heartbeat_seconds", &mut errors);
    positive(config.timing.first_move_seconds, "timing", "first_move_seconds", &mut errors);
    positive(config.timing.credit_seconds, "timing", "credit_seconds", &mut errors);
    positive(config.timing.grab_finish_ms, "timing", "grab_finish_ms", &mut errors);
    positive(config.actuator.pulse_ms, "actuator", "pulse_ms", &mut errors);

    if config.credits.max_per_payment == Some(0) {
        errors.push(ValidationError::MustBePositive {
            section: "credits",
            field: "max_per_payment",
        });
    }

    if let Some(price) = config.credits.price_per_credit
        && !(price.is_finite() && price > 0.0)
    {
        errors.push(ValidationError::MustBePositive {
            section: "credits",
            field: "price_per_credit",
        });
    }

    let credit_ms = config
        .timing
        .credit_seconds
        .unwrap_or(crate::DEFAULT_CREDIT_SECONDS)
        .saturating_mul(1000);
    let grab_ms = config
        .timing
        .grab_finish_ms
        .unwrap_or(crate::DEFAULT_GRAB_FINISH_MS);
    if grab_ms >= credit_ms {
        errors.push(ValidationError::GrabWindowTooLong { grab_ms, credit_ms });
    }

    errors.extend(validate_actuator(config));

    errors
}

fn validate_actuator(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let actuator = &config.actuator;

    let coin = actuator.coin_channel.unwrap_or(crate::DEFAULT_COIN_CHANNEL);
    let grab = actuator.grab_channel.unwrap_or(crate::DEFAULT_GRAB_CHANNEL);
    if coin == grab {
        errors.push(ValidationError::ActuatorError(format!(
            "coin_channel and grab_channel must differ (both {})",
            coin
        )));
    }

    if let Some(argv) = &actuator.command {
        match argv.first() {
            None => errors.push(ValidationError::ActuatorError(
                "command cannot be empty".into(),
            )),
            Some(program) if program.trim().is_empty() => errors.push(
                ValidationError::ActuatorError("command program cannot be blank".into()),
            ),
            Some(_) => {}
        }
    }

    errors
}
