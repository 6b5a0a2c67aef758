//! Parallel fan-out of commit protocol messages.

use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::client::Client;
use crate::error::{CallError, Result};
use crate::message::{Control, InvolvedOperators, OperatorKey};

/// Outcome of one broadcast: every involved key with its result.
pub(crate) struct BroadcastOutcome {
    pub results: Vec<(OperatorKey, Result<()>)>,
}

impl BroadcastOutcome {
    /// First failure, if any operator did not acknowledge.
    pub fn first_error(&self) -> Option<&CallError> {
        self.results.iter().find_map(|(_, r)| r.as_ref().err())
    }

    pub fn failed(&self) -> usize {
        self.results.iter().filter(|(_, r)| r.is_err()).count()
    }
}

/// Send `control` to every involved operator concurrently and wait for all.
pub(crate) async fn broadcast(
    client: &Client,
    control: Control,
    transaction_id: &str,
    involved: &InvolvedOperators,
    timeout: Duration,
) -> BroadcastOutcome {
    let keys: Vec<OperatorKey> = involved.keys().collect();
    debug!(
        transaction_id = %transaction_id,
        control = %control,
        operators = keys.len(),
        "Broadcasting"
    );

    let calls = keys.into_iter().map(|key| async move {
        let result = client.control(control, &key, transaction_id, timeout).await;
        if let Err(e) = &result {
            warn!(
                transaction_id = %transaction_id,
                operator = %key,
                control = %control,
                error = %e,
                "Broadcast to operator failed"
            );
        }
        (key, result)
    });

    BroadcastOutcome {
        results: join_all(calls).await,
    }
}
