//! Redirect rules and the outbound endpoint set.
//!
//! A redirect forwards one of this endpoint's own output addresses to one or
//! more remote addresses. Accepting a rule registers the target's endpoint
//! id as an outbound dependency, which guarantees its queue is declared and
//! bound before the link starts consuming. The publisher never consults this
//! table; `Endpoint::forward` resolves targets at the application seam.

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use tracing::{debug, info};

use crate::address::Address;

/// Append-only redirect rules plus the outbound endpoint ids whose queues
/// must exist.
pub struct RedirectTable {
    endpoint_id: String,
    rules: RwLock<HashMap<Address, Vec<Address>>>,
    outbounds: RwLock<BTreeSet<String>>,
}

impl RedirectTable {
    pub fn new(endpoint_id: impl Into<String>) -> Self {
        Self {
            endpoint_id: endpoint_id.into(),
            rules: RwLock::new(HashMap::new()),
            outbounds: RwLock::new(BTreeSet::new()),
        }
    }

    /// Add a redirect rule. Returns whether the rule was accepted.
    ///
    /// Only this endpoint's own output addresses may be redirected; a
    /// foreign source is a logged no-op. Duplicate targets are ignored.
    pub fn redirect(&self, source: &Address, target: &Address) -> bool {
        if source.endpoint_id != self.endpoint_id {
            debug!(
                source = %source,
                endpoint_id = %self.endpoint_id,
                "Ignoring redirect for a source this endpoint does not own"
            );
            return false;
        }

        self.register_outbound(&target.endpoint_id);

        let mut rules = self.rules.write().expect("redirect lock");
        let targets = rules.entry(source.clone()).or_default();
        if !targets.contains(target) {
            info!(source = %source, target = %target, "Adding redirect");
            targets.push(target.clone());
        }
        true
    }

    /// Register an endpoint id this process sends to, so its queue gets
    /// declared and bound during connection setup.
    pub fn register_outbound(&self, endpoint_id: &str) {
        let mut outbounds = self.outbounds.write().expect("outbound lock");
        if outbounds.insert(endpoint_id.to_string()) {
            info!(endpoint_id = %endpoint_id, "Registering outbound endpoint");
        }
    }

    /// Whether `endpoint_id` is a known outbound destination.
    pub fn knows_endpoint(&self, endpoint_id: &str) -> bool {
        self.outbounds
            .read()
            .expect("outbound lock")
            .contains(endpoint_id)
    }

    /// All outbound endpoint ids, in sorted order.
    pub fn outbound_endpoints(&self) -> Vec<String> {
        self.outbounds
            .read()
            .expect("outbound lock")
            .iter()
            .cloned()
            .collect()
    }

    /// Targets registered for a local output address.
    pub fn targets(&self, source: &Address) -> Vec<Address> {
        self.rules
            .read()
            .expect("redirect lock")
            .get(source)
            .cloned()
            .unwrap_or_default()
    }
}
