//! Plugin API surface: calls, hooks and the target trait.
//!
//! Calls follow `area.methodName` naming on the wire.
//!
//! # Call Areas
//!
//! | Area | Calls |
//! |------|-------|
//! | `timeline` | Layers and events |
//! | `inspector` | Custom inspectors, tree/state refresh, selection |
//! | `component` | Highlighting, bounds, names, update notification |
//! | `settings` | Plugin settings (local fallback) |
//! | `clock` | Timestamp (local fallback) |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

// ============================================================================
// ApiCall
// ============================================================================

/// Every invocable plugin API method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum ApiCall {
    /// Register a timeline layer.
    #[serde(rename = "timeline.addLayer")]
    AddTimelineLayer {
        /// Layer id.
        id: String,
        /// Display label.
        label: String,
        /// RGB color.
        color: u32,
    },

    /// Append an event to a timeline layer.
    #[serde(rename = "timeline.addEvent")]
    AddTimelineEvent {
        /// Target layer.
        #[serde(rename = "layerId")]
        layer_id: String,
        /// Event body.
        event: Value,
    },

    /// Register a custom inspector.
    #[serde(rename = "inspector.add")]
    AddInspector {
        /// Inspector id.
        id: String,
        /// Display label.
        label: String,
    },

    /// Ask the panel to refresh an inspector tree.
    #[serde(rename = "inspector.sendTree")]
    SendInspectorTree {
        /// Inspector id.
        #[serde(rename = "inspectorId")]
        inspector_id: String,
    },

    /// Ask the panel to refresh an inspector state.
    #[serde(rename = "inspector.sendState")]
    SendInspectorState {
        /// Inspector id.
        #[serde(rename = "inspectorId")]
        inspector_id: String,
    },

    /// Select a node in an inspector.
    #[serde(rename = "inspector.selectNode")]
    SelectInspectorNode {
        /// Inspector id.
        #[serde(rename = "inspectorId")]
        inspector_id: String,
        /// Node to select.
        #[serde(rename = "nodeId")]
        node_id: String,
    },

    /// Highlight a component instance in the page.
    #[serde(rename = "component.highlight")]
    HighlightElement {
        /// Component instance reference.
        instance: Value,
    },

    /// Remove the current highlight.
    #[serde(rename = "component.unhighlight")]
    UnhighlightElement,

    /// Bounding box of a component instance.
    #[serde(rename = "component.getBounds")]
    GetComponentBounds {
        /// Component instance reference.
        instance: Value,
    },

    /// Display name of a component instance.
    #[serde(rename = "component.getName")]
    GetComponentName {
        /// Component instance reference.
        instance: Value,
    },

    /// Signal that component data changed.
    #[serde(rename = "component.notifyUpdate")]
    NotifyComponentUpdate {
        /// Changed instance, or every instance when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        instance: Option<Value>,
    },

    /// Current plugin settings.
    #[serde(rename = "settings.get")]
    GetSettings,

    /// Merge values into the plugin settings.
    #[serde(rename = "settings.set")]
    SetSettings {
        /// Object of setting values.
        values: Map<String, Value>,
    },

    /// Current timestamp in milliseconds.
    #[serde(rename = "clock.now")]
    Now,
}

impl ApiCall {
    /// Wire method name.
    #[must_use]
    pub fn method(&self) -> &'static str {
        match self {
            Self::AddTimelineLayer { .. } => "timeline.addLayer",
            Self::AddTimelineEvent { .. } => "timeline.addEvent",
            Self::AddInspector { .. } => "inspector.add",
            Self::SendInspectorTree { .. } => "inspector.sendTree",
            Self::SendInspectorState { .. } => "inspector.sendState",
            Self::SelectInspectorNode { .. } => "inspector.selectNode",
            Self::HighlightElement { .. } => "component.highlight",
            Self::UnhighlightElement => "component.unhighlight",
            Self::GetComponentBounds { .. } => "component.getBounds",
            Self::GetComponentName { .. } => "component.getName",
            Self::NotifyComponentUpdate { .. } => "component.notifyUpdate",
            Self::GetSettings => "settings.get",
            Self::SetSettings { .. } => "settings.set",
            Self::Now => "clock.now",
        }
    }

    /// Returns `true` for calls answered locally before a target exists.
    #[inline]
    #[must_use]
    pub fn has_fallback(&self) -> bool {
        matches!(self, Self::GetSettings | Self::SetSettings { .. } | Self::Now)
    }
}

impl fmt::Display for ApiCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.method())
    }
}

// ============================================================================
// Hook
// ============================================================================

/// Subscribable plugin events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Hook {
    /// Component tree is being walked.
    VisitComponentTree,
    /// A component is being inspected.
    InspectComponent,
    /// Component state edit requested.
    EditComponentState,
    /// Custom inspector tree requested.
    GetInspectorTree,
    /// Custom inspector state requested.
    GetInspectorState,
    /// Custom inspector state edit requested.
    EditInspectorState,
    /// Timeline was cleared.
    TimelineCleared,
    /// Plugin settings changed.
    SetPluginSettings,
}

impl Hook {
    /// Event name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::VisitComponentTree => "visitComponentTree",
            Self::InspectComponent => "inspectComponent",
            Self::EditComponentState => "editComponentState",
            Self::GetInspectorTree => "getInspectorTree",
            Self::GetInspectorState => "getInspectorState",
            Self::EditInspectorState => "editInspectorState",
            Self::TimelineCleared => "timelineCleared",
            Self::SetPluginSettings => "setPluginSettings",
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Hook callback; may fill in or modify the hook payload.
pub type HookHandler = Arc<dyn Fn(&mut Value) + Send + Sync>;

// ============================================================================
// PluginApi
// ============================================================================

/// The real plugin API implementation.
#[async_trait]
pub trait PluginApi: Send + Sync + 'static {
    /// Executes one call.
    ///
    /// # Errors
    ///
    /// Implementation-defined; usually [`Error::TargetRejected`](crate::Error::TargetRejected).
    async fn invoke(&self, call: ApiCall) -> Result<Value>;

    /// Registers a hook handler.
    fn on(&self, hook: Hook, handler: HookHandler);
}

// ============================================================================
// PluginDescriptor
// ============================================================================

/// Identity and default settings of the plugin using the proxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Plugin id.
    pub id: String,
    /// Display label.
    pub label: String,
    /// Default setting values.
    #[serde(default)]
    pub settings: Map<String, Value>,
}

impl PluginDescriptor {
    /// Creates a descriptor without settings.
    #[must_use]
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            settings: Map::new(),
        }
    }

    /// Adds a default setting.
    #[must_use]
    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }
}

// ============================================================================
// Local Fallbacks
// ============================================================================

/// Milliseconds since the Unix epoch.
#[must_use]
pub(crate) fn now_millis() -> Value {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));
    Value::from(millis)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_call_wire_format() {
        let call = ApiCall::SelectInspectorNode {
            inspector_id: "store".into(),
            node_id: "root".into(),
        };
        let json = serde_json::to_value(&call).expect("serialize");
        assert_eq!(
            json,
            json!({
                "method": "inspector.selectNode",
                "params": { "inspectorId": "store", "nodeId": "root" }
            })
        );
        assert_eq!(call.method(), "inspector.selectNode");
    }

    #[test]
    fn test_unit_call_deserializes() {
        let call: ApiCall = serde_json::from_value(json!({ "method": "clock.now" })).expect("parse");
        assert_eq!(call, ApiCall::Now);
    }

    #[test]
    fn test_method_matches_serde_tag() {
        let calls = [
            ApiCall::UnhighlightElement,
            ApiCall::GetSettings,
            ApiCall::NotifyComponentUpdate { instance: None },
            ApiCall::AddTimelineLayer {
                id: "l".into(),
                label: "Layer".into(),
                color: 0x00ff00,
            },
        ];
        for call in calls {
            let json = serde_json::to_value(&call).expect("serialize");
            assert_eq!(json["method"], call.method());
        }
    }

    #[test]
    fn test_fallback_calls() {
        assert!(ApiCall::Now.has_fallback());
        assert!(ApiCall::GetSettings.has_fallback());
        assert!(ApiCall::SetSettings { values: Map::new() }.has_fallback());
        assert!(!ApiCall::UnhighlightElement.has_fallback());
    }

    #[test]
    fn test_hook_names() {
        assert_eq!(Hook::InspectComponent.to_string(), "inspectComponent");
        assert_eq!(
            serde_json::to_value(Hook::TimelineCleared).expect("serialize"),
            json!("timelineCleared")
        );
    }

    #[test]
    fn test_descriptor_settings() {
        let descriptor = PluginDescriptor::new("store", "Store").with_setting("verbose", true);
        assert_eq!(descriptor.settings.get("verbose"), Some(&json!(true)));
    }

    #[test]
    fn test_now_is_positive() {
        assert!(now_millis().as_u64().is_some_and(|ms| ms > 0));
    }
}
