//! The extension contract: plugins installed onto an [`crate::agent::Agent`]
//! at construction time.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::event::EventHandler;

/// A declarative `{event, priority, handler}` triple a component contributes.
/// Rust has no method-decorator reflection, so this stands in for the source
/// framework's annotation-discovery mechanism: the kernel calls
/// [`Component::handler_declarations`] once at install time and feeds each
/// entry through [`crate::event::EventRouter::on`] exactly as if the caller
/// had subscribed imperatively.
pub struct HandlerDeclaration {
    pub event: String,
    pub priority: i32,
    pub handler: Arc<dyn EventHandler>,
}

/// A plugin installed onto an agent. Contributes tools, event handlers, and
/// context providers; may spawn `wait_on_ready` background tasks during
/// install.
#[async_trait]
pub trait Component: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this component's handlers should currently take effect.
    /// Handlers are expected to check this themselves at dispatch time; the
    /// kernel does not unsubscribe a disabled component's handlers.
    fn enabled(&self) -> bool {
        true
    }

    async fn install(&self, agent: &crate::agent::Agent) -> Result<()>;

    async fn uninstall(&self, _agent: &crate::agent::Agent) -> Result<()> {
        Ok(())
    }

    fn handler_declarations(&self) -> Vec<HandlerDeclaration> {
        Vec::new()
    }
}
