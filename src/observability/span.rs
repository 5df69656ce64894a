//! Span facade over the OpenTelemetry tracer.
//!
//! The mode is picked once when telemetry starts. Call sites go through
//! [`SpanFacade`] and the free functions below and never check whether
//! tracing is enabled.

use std::borrow::Cow;
use std::fmt;

use opentelemetry::trace::{Status, TraceContextExt, Tracer as _, TracerProvider as _};
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::trace::{Tracer, TracerProvider};

/// Instrumentation scope name for spans created by this service.
pub const TRACER_NAME: &str = "application-tracer";

/// Starts spans for the active trace pipeline, or nothing at all.
#[derive(Clone)]
pub enum SpanFacade {
    Active(Tracer),
    Noop,
}

impl SpanFacade {
    /// Facade backed by a tracer from `provider`.
    pub fn from_provider(provider: &TracerProvider) -> Self {
        Self::Active(provider.tracer(TRACER_NAME))
    }

    /// Start a span named `name` as a child of whatever span `parent` carries.
    ///
    /// Returns the context holding the new span together with a handle to it.
    /// In noop mode the parent context is returned unchanged.
    pub fn start_span(
        &self,
        parent: &Context,
        name: impl Into<Cow<'static, str>>,
    ) -> (Context, RequestSpan) {
        match self {
            Self::Active(tracer) => {
                let span = tracer.start_with_context(name, parent);
                let cx = parent.with_span(span);
                (cx.clone(), RequestSpan { cx: Some(cx) })
            }
            Self::Noop => (parent.clone(), RequestSpan::noop()),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active(_))
    }
}

impl fmt::Debug for SpanFacade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active(_) => f.write_str("SpanFacade::Active"),
            Self::Noop => f.write_str("SpanFacade::Noop"),
        }
    }
}

/// Handle to a span started through [`SpanFacade::start_span`].
///
/// Every method is a no-op on the noop handle and after [`RequestSpan::end`].
#[derive(Debug)]
pub struct RequestSpan {
    cx: Option<Context>,
}

impl RequestSpan {
    pub fn noop() -> Self {
        Self { cx: None }
    }

    pub fn set_attributes(&self, attributes: impl IntoIterator<Item = KeyValue>) {
        if let Some(cx) = &self.cx {
            cx.span().set_attributes(attributes);
        }
    }

    pub fn add_event(&self, name: impl Into<Cow<'static, str>>, attributes: Vec<KeyValue>) {
        if let Some(cx) = &self.cx {
            cx.span().add_event(name, attributes);
        }
    }

    pub fn set_error(&self, description: impl Into<Cow<'static, str>>) {
        if let Some(cx) = &self.cx {
            cx.span().set_status(Status::error(description));
        }
    }

    /// Whether the span is sampled and recording.
    pub fn is_recording(&self) -> bool {
        self.cx
            .as_ref()
            .is_some_and(|cx| cx.span().is_recording())
    }

    /// End the span. Later calls on this handle do nothing.
    pub fn end(&mut self) {
        if let Some(cx) = self.cx.take() {
            cx.span().end();
        }
    }
}

/// Add an event to the span carried by `cx`. No span means no effect.
pub fn add_event(cx: &Context, name: impl Into<Cow<'static, str>>, attributes: Vec<KeyValue>) {
    if cx.has_active_span() {
        cx.span().add_event(name, attributes);
    }
}

/// Set attributes on the span carried by `cx`. No span means no effect.
pub fn set_attributes(cx: &Context, attributes: impl IntoIterator<Item = KeyValue>) {
    if cx.has_active_span() {
        cx.span().set_attributes(attributes);
    }
}
