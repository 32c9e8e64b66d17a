//! Call queue in front of a plugin API that may not exist yet.
//!
//! Before [`ApiProxy::set_real_target`], calls and hook subscriptions are
//! recorded. Attaching a target replays subscriptions first, then calls in
//! their original order, awaiting each before the next.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::fmt;
use std::mem;
use std::sync::Arc;

use futures_util::future::{self, BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};

use super::api::{ApiCall, Hook, HookHandler, PluginApi, PluginDescriptor, now_millis};

// ============================================================================
// Types
// ============================================================================

/// Future resolving to a call's result.
pub type CallFuture = BoxFuture<'static, Result<Value>>;

/// A call recorded before the target was attached.
struct PendingCall {
    call: ApiCall,
    /// `None` for calls already answered by a local fallback.
    responder: Option<oneshot::Sender<Result<Value>>>,
}

/// A hook registration recorded before the target was attached.
struct Subscription {
    hook: Hook,
    handler: HookHandler,
}

struct ProxyState {
    target: Option<Arc<dyn PluginApi>>,
    calls: VecDeque<PendingCall>,
    subscriptions: Vec<Subscription>,
}

struct ProxyInner {
    descriptor: PluginDescriptor,
    state: Mutex<ProxyState>,
    /// Settings answered locally until a target takes over.
    settings: Mutex<Map<String, Value>>,
}

// ============================================================================
// ApiProxy
// ============================================================================

/// Plugin API handle usable before the real API is available.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct ApiProxy {
    inner: Arc<ProxyInner>,
}

impl fmt::Debug for ApiProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ApiProxy")
            .field("plugin", &self.inner.descriptor.id)
            .field("attached", &state.target.is_some())
            .field("pending_calls", &state.calls.len())
            .field("pending_subscriptions", &state.subscriptions.len())
            .finish()
    }
}

impl ApiProxy {
    /// Creates a detached proxy for the plugin.
    #[must_use]
    pub fn new(descriptor: PluginDescriptor) -> Self {
        let settings = descriptor.settings.clone();
        Self {
            inner: Arc::new(ProxyInner {
                descriptor,
                state: Mutex::new(ProxyState {
                    target: None,
                    calls: VecDeque::new(),
                    subscriptions: Vec::new(),
                }),
                settings: Mutex::new(settings),
            }),
        }
    }

    /// Returns the plugin descriptor.
    #[inline]
    #[must_use]
    pub fn descriptor(&self) -> &PluginDescriptor {
        &self.inner.descriptor
    }

    /// Issues a call.
    ///
    /// The call is recorded (or forwarded) before this returns; the returned
    /// future only waits for the result. Dropping it does not cancel the call.
    pub fn call(&self, call: ApiCall) -> CallFuture {
        let mut state = self.inner.state.lock();

        if let Some(target) = state.target.clone() {
            drop(state);
            if let ApiCall::SetSettings { values } = &call {
                self.merge_settings(values);
            }
            trace!(method = call.method(), "Forwarding call");
            return async move { target.invoke(call).await }.boxed();
        }

        if call.has_fallback() {
            let answer = self.fallback(&call);
            debug!(method = call.method(), "Answered locally, queued for replay");
            state.calls.push_back(PendingCall {
                call,
                responder: None,
            });
            return future::ready(Ok(answer)).boxed();
        }

        let (tx, rx) = oneshot::channel();
        debug!(method = call.method(), queued = state.calls.len() + 1, "Call queued");
        state.calls.push_back(PendingCall {
            call,
            responder: Some(tx),
        });

        async move { rx.await.unwrap_or(Err(Error::TargetDetached)) }.boxed()
    }

    /// Subscribes to a hook.
    pub fn on<F>(&self, hook: Hook, handler: F)
    where
        F: Fn(&mut Value) + Send + Sync + 'static,
    {
        let handler: HookHandler = Arc::new(handler);
        let mut state = self.inner.state.lock();

        match state.target.clone() {
            Some(target) => {
                drop(state);
                target.on(hook, handler);
            }
            None => {
                debug!(%hook, "Subscription queued");
                state.subscriptions.push(Subscription { hook, handler });
            }
        }
    }

    /// Attaches the real API and replays everything recorded so far.
    ///
    /// Later calls bypass the queue. Calling this again switches to the new
    /// target; nothing is replayed twice.
    pub async fn set_real_target(&self, target: Arc<dyn PluginApi>) {
        let (subscriptions, calls) = {
            let mut state = self.inner.state.lock();
            if state.target.is_some() {
                warn!(plugin = %self.inner.descriptor.id, "Replacing attached API target");
            }
            state.target = Some(Arc::clone(&target));
            (
                mem::take(&mut state.subscriptions),
                mem::take(&mut state.calls),
            )
        };

        info!(
            plugin = %self.inner.descriptor.id,
            subscriptions = subscriptions.len(),
            calls = calls.len(),
            "API target attached, replaying"
        );

        for Subscription { hook, handler } in subscriptions {
            target.on(hook, handler);
        }

        for PendingCall { call, responder } in calls {
            let method = call.method();
            let result = target.invoke(call).await;
            if let Err(e) = &result {
                warn!(method, error = %e, "Replayed call failed");
            }
            if let Some(responder) = responder {
                let _ = responder.send(result);
            }
        }

        debug!(plugin = %self.inner.descriptor.id, "Replay complete");
    }
}

// ============================================================================
// ApiProxy - Inspection
// ============================================================================

impl ApiProxy {
    /// Returns `true` once a target is attached.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.inner.state.lock().target.is_some()
    }

    /// Calls waiting for replay, in order.
    #[must_use]
    pub fn pending_calls(&self) -> Vec<ApiCall> {
        let state = self.inner.state.lock();
        state.calls.iter().map(|pending| pending.call.clone()).collect()
    }

    /// Hooks waiting for replay, in order.
    #[must_use]
    pub fn pending_subscriptions(&self) -> Vec<Hook> {
        let state = self.inner.state.lock();
        state.subscriptions.iter().map(|sub| sub.hook).collect()
    }
}

// ============================================================================
// ApiProxy - Fallbacks
// ============================================================================

impl ApiProxy {
    fn fallback(&self, call: &ApiCall) -> Value {
        match call {
            ApiCall::GetSettings => Value::Object(self.inner.settings.lock().clone()),
            ApiCall::SetSettings { values } => {
                self.merge_settings(values);
                Value::Null
            }
            ApiCall::Now => now_millis(),
            _ => Value::Null,
        }
    }

    fn merge_settings(&self, values: &Map<String, Value>) {
        let mut settings = self.inner.settings.lock();
        for (key, value) in values {
            settings.insert(key.clone(), value.clone());
        }
    }
}

// ============================================================================
// ApiProxy - Typed Calls
// ============================================================================

impl ApiProxy {
    /// Registers a timeline layer.
    pub fn add_timeline_layer(
        &self,
        id: impl Into<String>,
        label: impl Into<String>,
        color: u32,
    ) -> CallFuture {
        self.call(ApiCall::AddTimelineLayer {
            id: id.into(),
            label: label.into(),
            color,
        })
    }

    /// Appends an event to a timeline layer.
    pub fn add_timeline_event(&self, layer_id: impl Into<String>, event: Value) -> CallFuture {
        self.call(ApiCall::AddTimelineEvent {
            layer_id: layer_id.into(),
            event,
        })
    }

    /// Registers a custom inspector.
    pub fn add_inspector(&self, id: impl Into<String>, label: impl Into<String>) -> CallFuture {
        self.call(ApiCall::AddInspector {
            id: id.into(),
            label: label.into(),
        })
    }

    /// Requests an inspector tree refresh.
    pub fn send_inspector_tree(&self, inspector_id: impl Into<String>) -> CallFuture {
        self.call(ApiCall::SendInspectorTree {
            inspector_id: inspector_id.into(),
        })
    }

    /// Requests an inspector state refresh.
    pub fn send_inspector_state(&self, inspector_id: impl Into<String>) -> CallFuture {
        self.call(ApiCall::SendInspectorState {
            inspector_id: inspector_id.into(),
        })
    }

    /// Selects an inspector node.
    pub fn select_inspector_node(
        &self,
        inspector_id: impl Into<String>,
        node_id: impl Into<String>,
    ) -> CallFuture {
        self.call(ApiCall::SelectInspectorNode {
            inspector_id: inspector_id.into(),
            node_id: node_id.into(),
        })
    }

    /// Highlights a component instance.
    pub fn highlight_element(&self, instance: Value) -> CallFuture {
        self.call(ApiCall::HighlightElement { instance })
    }

    /// Removes the highlight.
    pub fn unhighlight_element(&self) -> CallFuture {
        self.call(ApiCall::UnhighlightElement)
    }

    /// Bounding box of a component instance.
    pub fn get_component_bounds(&self, instance: Value) -> CallFuture {
        self.call(ApiCall::GetComponentBounds { instance })
    }

    /// Display name of a component instance.
    pub fn get_component_name(&self, instance: Value) -> CallFuture {
        self.call(ApiCall::GetComponentName { instance })
    }

    /// Signals a component update.
    pub fn notify_component_update(&self, instance: Option<Value>) -> CallFuture {
        self.call(ApiCall::NotifyComponentUpdate { instance })
    }

    /// Current plugin settings.
    pub fn get_settings(&self) -> CallFuture {
        self.call(ApiCall::GetSettings)
    }

    /// Merges setting values.
    pub fn set_settings(&self, values: Map<String, Value>) -> CallFuture {
        self.call(ApiCall::SetSettings { values })
    }

    /// Current timestamp in milliseconds.
    pub fn now(&self) -> CallFuture {
        self.call(ApiCall::Now)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use serde_json::json;

    /// Target recording every invocation and subscription.
    #[derive(Default)]
    struct MockTarget {
        log: Mutex<Vec<String>>,
        hooks: Mutex<Vec<(Hook, HookHandler)>>,
    }

    impl MockTarget {
        fn log(&self) -> Vec<String> {
            self.log.lock().clone()
        }

        fn fire(&self, hook: Hook, payload: &mut Value) {
            let handlers: Vec<HookHandler> = self
                .hooks
                .lock()
                .iter()
                .filter(|(h, _)| *h == hook)
                .map(|(_, handler)| Arc::clone(handler))
                .collect();
            for handler in handlers {
                handler(payload);
            }
        }
    }

    #[async_trait]
    impl PluginApi for MockTarget {
        async fn invoke(&self, call: ApiCall) -> Result<Value> {
            let method = call.method();
            self.log.lock().push(method.to_owned());
            tokio::task::yield_now().await;
            match call {
                ApiCall::GetComponentName { instance } => Ok(json!(format!("Comp{instance}"))),
                ApiCall::HighlightElement { .. } => {
                    Err(Error::target_rejected(method, "no such instance"))
                }
                _ => Ok(Value::Null),
            }
        }

        fn on(&self, hook: Hook, handler: HookHandler) {
            self.log.lock().push(format!("on:{hook}"));
            self.hooks.lock().push((hook, handler));
        }
    }

    fn proxy() -> ApiProxy {
        ApiProxy::new(PluginDescriptor::new("store", "Store").with_setting("verbose", false))
    }

    #[tokio::test]
    async fn test_calls_replay_in_order() {
        let proxy = proxy();
        let first = proxy.add_inspector("store", "Store");
        let second = proxy.get_component_name(json!(1));
        let third = proxy.unhighlight_element();

        assert!(!proxy.is_attached());
        assert_eq!(
            proxy.pending_calls().iter().map(ApiCall::method).collect::<Vec<_>>(),
            vec!["inspector.add", "component.getName", "component.unhighlight"]
        );

        let target = Arc::new(MockTarget::default());
        proxy.set_real_target(target.clone()).await;

        assert_eq!(first.await.expect("first"), Value::Null);
        assert_eq!(second.await.expect("second"), json!("Comp1"));
        assert_eq!(third.await.expect("third"), Value::Null);
        assert_eq!(
            target.log(),
            vec!["inspector.add", "component.getName", "component.unhighlight"]
        );
        assert!(proxy.pending_calls().is_empty());
    }

    #[tokio::test]
    async fn test_subscriptions_replay_before_calls() {
        let proxy = proxy();
        let call = proxy.send_inspector_tree("store");
        proxy.on(Hook::GetInspectorTree, |payload| {
            payload["rootNodes"] = json!([{ "id": "root" }]);
        });
        proxy.on(Hook::TimelineCleared, |_| {});
        assert_eq!(
            proxy.pending_subscriptions(),
            vec![Hook::GetInspectorTree, Hook::TimelineCleared]
        );

        let target = Arc::new(MockTarget::default());
        proxy.set_real_target(target.clone()).await;
        call.await.expect("call");

        assert_eq!(
            target.log(),
            vec!["on:getInspectorTree", "on:timelineCleared", "inspector.sendTree"]
        );

        let mut payload = json!({});
        target.fire(Hook::GetInspectorTree, &mut payload);
        assert_eq!(payload, json!({ "rootNodes": [{ "id": "root" }] }));
    }

    #[tokio::test]
    async fn test_failed_replay_does_not_stop_the_rest() {
        let proxy = proxy();
        let failing = proxy.highlight_element(json!(7));
        let after = proxy.get_component_name(json!(2));

        let target = Arc::new(MockTarget::default());
        proxy.set_real_target(target.clone()).await;

        assert!(matches!(
            failing.await,
            Err(Error::TargetRejected { ref method, .. }) if method == "component.highlight"
        ));
        assert_eq!(after.await.expect("after"), json!("Comp2"));
    }

    #[tokio::test]
    async fn test_fallbacks_answer_immediately_and_replay() {
        let proxy = proxy();

        let settings = proxy.get_settings().await.expect("settings");
        assert_eq!(settings, json!({ "verbose": false }));

        let mut values = Map::new();
        values.insert("verbose".into(), json!(true));
        proxy.set_settings(values).await.expect("set");
        assert_eq!(
            proxy.get_settings().await.expect("settings"),
            json!({ "verbose": true })
        );

        let now = proxy.now().await.expect("now");
        assert!(now.as_u64().is_some());

        assert_eq!(
            proxy.pending_calls().iter().map(ApiCall::method).collect::<Vec<_>>(),
            vec!["settings.get", "settings.set", "settings.get", "clock.now"]
        );

        let target = Arc::new(MockTarget::default());
        proxy.set_real_target(target.clone()).await;
        assert_eq!(target.log().len(), 4);
    }

    #[tokio::test]
    async fn test_attached_calls_bypass_queue() {
        let proxy = proxy();
        let target = Arc::new(MockTarget::default());
        proxy.set_real_target(target.clone()).await;
        assert!(proxy.is_attached());

        let name = proxy.get_component_name(json!(3)).await.expect("name");
        assert_eq!(name, json!("Comp3"));
        proxy.on(Hook::InspectComponent, |_| {});

        assert!(proxy.pending_calls().is_empty());
        assert!(proxy.pending_subscriptions().is_empty());
        assert_eq!(target.log(), vec!["component.getName", "on:inspectComponent"]);
    }

    #[tokio::test]
    async fn test_reattach_replaces_target() {
        let proxy = proxy();
        let first = Arc::new(MockTarget::default());
        let second = Arc::new(MockTarget::default());

        let _ = proxy.unhighlight_element();
        proxy.set_real_target(first.clone()).await;
        proxy.set_real_target(second.clone()).await;
        proxy.unhighlight_element().await.expect("call");

        assert_eq!(first.log(), vec!["component.unhighlight"]);
        assert_eq!(second.log(), vec!["component.unhighlight"]);
    }

    #[tokio::test]
    async fn test_dropped_proxy_rejects_queued_calls() {
        let proxy = proxy();
        let call = proxy.unhighlight_element();
        drop(proxy);
        assert!(matches!(call.await, Err(Error::TargetDetached)));
    }
}
