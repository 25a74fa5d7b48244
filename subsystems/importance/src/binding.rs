//! # Bindings
//!
//! Directed client → target edges. A client hands part of its importance
//! to every process it is bound to; the flags decide how much.
//!
//! ```text
//!   ┌────────┐  service bind (flags)   ┌────────┐
//!   │ client │ ──────────────────────▶ │ target │
//!   └────────┘                         └────────┘
//!        │      provider connection        ▲
//!        └─────────────────────────────────┘
//! ```

use core::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;

use crate::config::Millis;
use crate::process::Pid;

bitflags! {
    /// Flags carried by a service binding
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BindFlags: u32 {
        /// Raise the target to the client's importance, capped at the client
        const IMPORTANT                       = 1 << 0;
        /// Target is more important than its client
        const ABOVE_CLIENT                    = 1 << 1;
        /// Target is managed like a started service
        const ALLOW_OOM_MANAGEMENT            = 1 << 2;
        /// Do not inherit the client's importance
        const WAIVE_PRIORITY                  = 1 << 3;
        /// Follow the visibility of the binding activity
        const ADJUST_WITH_ACTIVITY            = 1 << 4;
        /// Never lift the target into the foreground scheduling group
        const NOT_FOREGROUND                  = 1 << 5;
        /// Cap at perceptible-low
        const NOT_PERCEPTIBLE                 = 1 << 6;
        /// Cap at perceptible
        const NOT_VISIBLE                     = 1 << 7;
        /// Cap at perceptible-medium
        const ALMOST_PERCEPTIBLE              = 1 << 8;
        /// Pass the client's capabilities on
        const INCLUDE_CAPABILITIES            = 1 << 9;
        /// Schedule the target like the top app
        const SCHEDULE_LIKE_TOP_APP           = 1 << 10;
        /// Bound foreground service while the device is awake
        const FOREGROUND_SERVICE_WHILE_AWAKE  = 1 << 11;
        /// Bound foreground service
        const FOREGROUND_SERVICE              = 1 << 12;
        /// Important background work
        const IMPORTANT_BACKGROUND            = 1 << 13;
        /// Treat the target like an activity host when cached
        const TREAT_LIKE_ACTIVITY             = 1 << 14;
    }
}

/// What created the edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    /// Service binding
    Service {
        /// Last time the bound service did work
        last_activity: Millis,
        /// Visibility of the activity that made the binding, if any
        activity_visible: Option<bool>,
    },
    /// Content-provider connection
    Provider,
    /// Client hosts activities bound to the target
    ClientActivity,
}

impl BindingKind {
    /// Plain service binding with no activity attached
    pub const fn service() -> Self {
        BindingKind::Service { last_activity: 0, activity_visible: None }
    }

    /// Short name for logging
    pub const fn name(&self) -> &'static str {
        match self {
            BindingKind::Service { .. } => "service",
            BindingKind::Provider => "provider",
            BindingKind::ClientActivity => "client-activity",
        }
    }
}

/// Edge identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BindingId(pub u64);

static NEXT_BINDING_ID: AtomicU64 = AtomicU64::new(1);

impl BindingId {
    fn next() -> Self {
        Self(NEXT_BINDING_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A directed client → target edge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    /// Edge id
    pub id: BindingId,
    /// Process holding the binding
    pub client: Pid,
    /// Process hosting the bound service or provider
    pub target: Pid,
    /// Edge kind
    pub kind: BindingKind,
    /// Service binding flags (empty for other kinds)
    pub flags: BindFlags,
}

impl Binding {
    /// Service binding
    pub fn service(client: Pid, target: Pid, flags: BindFlags) -> Self {
        Self::new(client, target, BindingKind::service(), flags)
    }

    /// Content-provider connection
    pub fn provider(client: Pid, target: Pid) -> Self {
        Self::new(client, target, BindingKind::Provider, BindFlags::empty())
    }

    /// Client-activity relationship
    pub fn client_activity(client: Pid, target: Pid) -> Self {
        Self::new(client, target, BindingKind::ClientActivity, BindFlags::empty())
    }

    /// Edge with an explicit kind
    pub fn new(client: Pid, target: Pid, kind: BindingKind, flags: BindFlags) -> Self {
        Self { id: BindingId::next(), client, target, kind, flags }
    }

    /// Record when the bound service last did work
    pub fn with_last_activity(mut self, at: Millis) -> Self {
        if let BindingKind::Service { ref mut last_activity, .. } = self.kind {
            *last_activity = at;
        }
        self
    }

    /// Attach the binding activity's visibility
    pub fn with_activity(mut self, visible: bool) -> Self {
        if let BindingKind::Service { ref mut activity_visible, .. } = self.kind {
            *activity_visible = Some(visible);
        }
        self
    }

    /// Client and target are the same process
    pub fn is_self_binding(&self) -> bool {
        self.client == self.target
    }

    /// Check flag
    pub fn has(&self, flags: BindFlags) -> bool {
        self.flags.intersects(flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_ids_are_unique() {
        let a = Binding::service(1, 2, BindFlags::empty());
        let b = Binding::service(1, 2, BindFlags::empty());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_service_builders() {
        let binding = Binding::service(1, 2, BindFlags::ADJUST_WITH_ACTIVITY)
            .with_activity(true)
            .with_last_activity(500);
        assert_eq!(
            binding.kind,
            BindingKind::Service { last_activity: 500, activity_visible: Some(true) }
        );
        assert!(binding.has(BindFlags::ADJUST_WITH_ACTIVITY | BindFlags::IMPORTANT));
        assert!(!binding.has(BindFlags::IMPORTANT));
    }

    #[test]
    fn test_provider_ignores_service_builders() {
        let binding = Binding::provider(3, 3).with_activity(true);
        assert_eq!(binding.kind, BindingKind::Provider);
        assert!(binding.is_self_binding());
        assert_eq!(binding.kind.name(), "provider");
    }
}
