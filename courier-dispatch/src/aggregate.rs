//! Folding outcomes into a [`DispatchSummary`].

use crate::{
    error::DispatchError,
    types::{DeliveryMode, DispatchSummary, TransmissionOutcome},
};

/// Counts successes and failures, keeping outcome order.
///
/// In individual mode every outcome stands for one recipient and `total` is
/// the number of outcomes, which must equal `recipients`. In combined mode
/// there must be exactly one outcome; `total` is `recipients` and the whole
/// list counts as delivered or failed together.
///
/// # Errors
///
/// [`DispatchError::InvariantViolation`] when the outcomes do not match the
/// recipient count. This indicates a defect in the caller.
pub fn aggregate(
    mode: DeliveryMode,
    recipients: usize,
    outcomes: Vec<TransmissionOutcome>,
) -> Result<DispatchSummary, DispatchError> {
    if outcomes.is_empty() && recipients > 0 {
        return Err(DispatchError::InvariantViolation(format!(
            "no outcomes recorded for {recipients} recipients"
        )));
    }

    let (total, successful) = match mode {
        DeliveryMode::Individual => {
            if outcomes.len() != recipients {
                return Err(DispatchError::InvariantViolation(format!(
                    "{} outcomes recorded for {recipients} recipients",
                    outcomes.len()
                )));
            }
            (
                outcomes.len(),
                outcomes.iter().filter(|outcome| outcome.success).count(),
            )
        }
        DeliveryMode::CombinedRecipients => match outcomes.as_slice() {
            [outcome] if outcome.target.len() == recipients => {
                (recipients, if outcome.success { recipients } else { 0 })
            }
            [outcome] => {
                return Err(DispatchError::InvariantViolation(format!(
                    "combined outcome covers {} of {recipients} recipients",
                    outcome.target.len()
                )));
            }
            _ => {
                return Err(DispatchError::InvariantViolation(format!(
                    "combined dispatch produced {} outcomes",
                    outcomes.len()
                )));
            }
        },
    };

    Ok(DispatchSummary {
        mode,
        total,
        successful,
        failed: total - successful,
        outcomes,
        cancelled: false,
    })
}
