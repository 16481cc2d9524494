use tracing::{info, warn};

use crate::{error::ServiceError, state::SharedState};

/// Check a PIN against the configured manager PIN.
///
/// Plain comparison; the PIN gates convenience features, it does not protect secrets.
pub fn verify_pin(state: &SharedState, pin: &str) -> Result<(), ServiceError> {
    if pin == state.config().manager_pin() {
        info!("manager PIN accepted");
        Ok(())
    } else {
        warn!("manager PIN rejected");
        Err(ServiceError::Unauthorized("invalid manager PIN".into()))
    }
}
