//! Process identifiers: location-transparent actor handles.
//!
//! A [`Pid`] names a process by `(address, id)` where `address` is the node
//! that hosts it and `id` is the node-local process name. The third field,
//! `request_id`, repurposes the pid to address one pending slot inside a
//! shared future process; `0` means "no correlation".

use serde::{Deserialize, Serialize};
use std::fmt;

/// Location-transparent handle to a process.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pid {
    /// Address of the hosting node (`host:port` for cluster members).
    pub address: String,
    /// Node-local process name.
    pub id: String,
    /// Correlation slot inside a shared future process; `0` = none.
    pub request_id: u32,
}

impl Pid {
    /// Create a pid with no request correlation.
    pub fn new(address: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            id: id.into(),
            request_id: 0,
        }
    }

    /// Copy of this pid addressing a specific pending request slot.
    pub fn with_request_id(&self, request_id: u32) -> Self {
        Self {
            address: self.address.clone(),
            id: self.id.clone(),
            request_id,
        }
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.request_id == 0 {
            write!(f, "{}/{}", self.address, self.id)
        } else {
            write!(f, "{}/{}#{}", self.address, self.id, self.request_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_request_id_keeps_address_and_id() {
        let pid = Pid::new("127.0.0.1:4500", "worker");
        let slot = pid.with_request_id(7);
        assert_eq!(slot.address, pid.address);
        assert_eq!(slot.id, pid.id);
        assert_eq!(slot.request_id, 7);
        assert_eq!(pid.request_id, 0);
    }

    #[test]
    fn test_display() {
        let pid = Pid::new("node-a:1", "placement-activator");
        assert_eq!(pid.to_string(), "node-a:1/placement-activator");
        assert_eq!(
            pid.with_request_id(3).to_string(),
            "node-a:1/placement-activator#3"
        );
    }

    #[test]
    fn test_serde_round_trip() {
        let pid = Pid::new("node-a:1", "futures").with_request_id(42);
        let json = serde_json::to_string(&pid).expect("serialize pid");
        let back: Pid = serde_json::from_str(&json).expect("deserialize pid");
        assert_eq!(back, pid);
    }
}
