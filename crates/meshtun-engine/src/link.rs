//! Link-state change handling
//!
//! The link monitor reports that *something* about the host network
//! changed; this module decides how much the transport needs to care.
//! An unchanged interface snapshot is a minor change (NAT re-discovery
//! only); anything else, including the first observation, is major and
//! forces a full socket rebind first.

use tracing::{debug, warn};

use crate::engine::Engine;

impl Engine {
    /// Classify a host network change and poke the transport accordingly
    ///
    /// `is_expensive` is the link monitor's metered-link flag and is
    /// part of the compared snapshot. A failed interface lookup abandons
    /// this invocation; the prior state is retained.
    pub async fn link_change(&self, is_expensive: bool) {
        let mut state = match self.link_mon.current_state() {
            Ok(state) => state,
            Err(e) => {
                warn!("link_change: reading interface state: {e}");
                return;
            }
        };
        state.remove_interface(self.tundev.name());
        state.is_expensive = is_expensive;

        // Replace wholesale, whichever branch is taken below.
        let major = {
            let mut shared = self.shared_lock();
            let changed = shared.link_state.as_ref() != Some(&state);
            shared.link_state = Some(state);
            changed
        };

        debug!("link_change(is_expensive={is_expensive}): major={major}");

        if major {
            self.transport.rebind().await;
            self.transport.rediscover("link-change-major").await;
        } else {
            self.transport.rediscover("link-change-minor").await;
        }
    }
}
