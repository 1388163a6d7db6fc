//! Protocol operations: one self-describing handler per OSP verb, collected
//! in a catalogue built once at startup.

mod info;
mod registry;
mod scans;
mod vts;

pub use info::{GetMemoryUsage, GetPerformance, GetScannerDetails, GetVersion, HelpCommand};
pub use registry::CommandRegistry;
pub use scans::{DeleteScan, GetScans, StartScan, StopScan};
pub use vts::GetVts;

use async_trait::async_trait;
use thiserror::Error;
use tracing::error;

use crate::daemon::Daemon;
use crate::xml::{simple_response, Element};

/// Lazily produced response fragments. Finite, single-threaded, not
/// restartable; the transport writes fragments as they come instead of
/// buffering the whole document.
pub type Fragments = Box<dyn Iterator<Item = String> + Send>;

/// What a handler gives back: either one complete response document, or a
/// fragment stream (used only for the potentially large VT listing).
pub enum Response {
    Buffer(String),
    Stream(Fragments),
}

impl Response {
    pub fn from_element(element: Element) -> Response {
        Response::Buffer(element.render())
    }

    /// Flatten into one string. Consumes a stream, so mostly for tests and
    /// small callers.
    pub fn into_string(self) -> String {
        match self {
            Response::Buffer(s) => s,
            Response::Stream(fragments) => fragments.collect(),
        }
    }
}

/// A rejected request, scoped to the command that rejected it. Surfaced to
/// the caller as a normal response document, never a crash.
#[derive(Debug, Error)]
#[error("{command}: {message}")]
pub struct CommandError {
    pub command: String,
    pub status: u16,
    pub message: String,
}

impl CommandError {
    pub fn new(command: &str, message: impl Into<String>) -> Self {
        CommandError {
            command: command.to_string(),
            status: 400,
            message: message.into(),
        }
    }

    pub fn with_status(command: &str, status: u16, message: impl Into<String>) -> Self {
        CommandError {
            command: command.to_string(),
            status,
            message: message.into(),
        }
    }

    pub fn to_response(&self) -> String {
        simple_response(&self.command, self.status, &self.message, vec![]).render()
    }
}

/// Registry failures reaching a handler mean the handler broke the caller
/// contract (existence checks happen before mutation); log loudly and turn
/// it into a command-scoped 500.
pub(crate) fn internal_error(command: &str, err: impl std::fmt::Display) -> CommandError {
    error!(command, error = %err, "internal failure while handling command");
    CommandError::with_status(command, 500, format!("Internal error: {err}"))
}

/// One protocol operation: wire name, self-description metadata, and the
/// handler that validates a request element and applies it.
#[async_trait]
pub trait Command: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Documented request attributes, `(name, description)`.
    fn attributes(&self) -> &'static [(&'static str, &'static str)] {
        &[]
    }

    /// Documented nested elements, `(name, description)`.
    fn elements(&self) -> &'static [(&'static str, &'static str)] {
        &[]
    }

    async fn handle(&self, daemon: &Daemon, request: &Element)
        -> Result<Response, CommandError>;

    /// Structured self-description, used by `help format="xml"`.
    fn as_xml(&self) -> Element {
        let mut el = Element::new("command").attr("name", self.name());
        el.children
            .push(Element::with_text("description", self.description()));

        if !self.attributes().is_empty() {
            let mut attrs = Element::new("attributes");
            for (name, desc) in self.attributes() {
                attrs
                    .children
                    .push(Element::with_text("attribute", *desc).attr("name", *name));
            }
            el.children.push(attrs);
        }

        if !self.elements().is_empty() {
            let mut elems = Element::new("elements");
            for (name, desc) in self.elements() {
                elems
                    .children
                    .push(Element::with_text("element", *desc).attr("name", *name));
            }
            el.children.push(elems);
        }

        el
    }
}
