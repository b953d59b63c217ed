// Booking input validation
// Every check here runs before the client touches the network, the queue or the cache

use chrono::NaiveDate;

use crate::error::ValidationError;
use crate::format::{self, currency_info};
use crate::model::{CreateReservation, Reservation, ReservationPatch};

pub type ValidationResult<T> = Result<T, ValidationError>;

pub fn validate_required(field: &str, value: &str) -> ValidationResult<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::RequiredField {
            field: field.to_string(),
        });
    }
    Ok(())
}

pub fn validate_occupants(occupants: u32) -> ValidationResult<()> {
    if occupants < 1 {
        return Err(ValidationError::InvalidOccupants(occupants));
    }
    Ok(())
}

// Returns the number of nights on success.
// Order of checks: range first, then past check-in, then maximum stay.
pub fn validate_booking_dates(
    check_in: NaiveDate,
    check_out: NaiveDate,
    today: NaiveDate,
    max_stay_nights: u32,
) -> ValidationResult<u32> {
    if check_out <= check_in {
        return Err(ValidationError::InvalidDateRange);
    }
    if check_in < today {
        return Err(ValidationError::CheckInInPast);
    }

    let nights = format::nights_between(check_in, check_out);
    if nights > max_stay_nights as i64 {
        return Err(ValidationError::StayTooLong {
            nights,
            max: max_stay_nights,
        });
    }
    Ok(nights as u32)
}

pub fn validate_amount(amount: f64, currency: &str, max_amount: f64) -> ValidationResult<()> {
    let info = currency_info(currency)
        .ok_or_else(|| ValidationError::UnsupportedCurrency(currency.to_string()))?;

    if !amount.is_finite() {
        return Err(ValidationError::InvalidAmount(amount.to_string()));
    }
    if amount < 0.0 || amount > max_amount {
        return Err(ValidationError::AmountOutOfRange {
            amount,
            max: max_amount,
        });
    }

    let scaled = amount * 10f64.powi(info.minor_digits as i32);
    if (scaled - scaled.round()).abs() > 1e-6 {
        return Err(ValidationError::InvalidDecimals {
            amount,
            currency: info.code.to_string(),
            max_decimals: info.minor_digits,
        });
    }
    Ok(())
}

pub fn validate_create(payload: &CreateReservation) -> ValidationResult<()> {
    validate_required("guestId", &payload.guest_id)?;
    validate_required("roomId", &payload.room_id)?;
    if payload.check_out <= payload.check_in {
        return Err(ValidationError::InvalidDateRange);
    }
    validate_occupants(payload.occupants)?;
    if let Some(total) = payload.total_amount {
        if !total.is_finite() || total < 0.0 {
            return Err(ValidationError::InvalidAmount(total.to_string()));
        }
    }
    Ok(())
}

// Checks a patch on its own, and against the current record when one is cached
pub fn validate_patch(
    patch: &ReservationPatch,
    current: Option<&Reservation>,
) -> ValidationResult<()> {
    if let Some(occupants) = patch.occupants {
        validate_occupants(occupants)?;
    }

    let check_in = patch.check_in.or(current.map(|r| r.check_in));
    let check_out = patch.check_out.or(current.map(|r| r.check_out));
    if let (Some(check_in), Some(check_out)) = (check_in, check_out) {
        if check_out <= check_in {
            return Err(ValidationError::InvalidDateRange);
        }
    }

    if let (Some(next), Some(current)) = (patch.status, current) {
        if !current.status.can_transition_to(next) {
            return Err(ValidationError::InvalidStatusTransition {
                from: current.status.to_string(),
                to: next.to_string(),
            });
        }
    }

    if let Some(total) = patch.total_amount {
        if !total.is_finite() || total < 0.0 {
            return Err(ValidationError::InvalidAmount(total.to_string()));
        }
    }
    Ok(())
}
