use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// Shape checks shared by every entry point that accepts a rental range.
pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    check_span(span, MAX_RENTAL_SPAN_MS)
}

/// Blackouts get the same checks with a wider cap.
pub(crate) fn validate_blackout_span(span: &Span) -> Result<(), EngineError> {
    check_span(span, MAX_BLACKOUT_SPAN_MS)
}

fn check_span(span: &Span, max_width: Ms) -> Result<(), EngineError> {
    if !span.is_valid() {
        return Err(EngineError::InvalidRange(format!(
            "end {} must be after start {}",
            span.end, span.start
        )));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > max_width {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

pub(crate) fn check_minimum_rental(item: &InventoryItem, span: &Span) -> Result<(), EngineError> {
    let min = item.minimum_rental.duration_ms();
    if span.duration_ms() < min {
        return Err(EngineError::InvalidRange(format!(
            "{} requires at least {} day(s) {} hour(s)",
            item.id, item.minimum_rental.days, item.minimum_rental.hours
        )));
    }
    Ok(())
}
