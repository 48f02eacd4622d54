//! Fan-out point for everything observational: markup lines, link events,
//! telemetry snapshots. Cheap to clone; every component holds its own copy.

use std::sync::Arc;

use hoverlink_types::Telemetry;
use tracing::info;

use crate::bus::{DiagnosticBus, DiagnosticEvent, DiagnosticPayload, LinkEvent, Topic};
use crate::markup::{MarkupSink, MarkupSource, protocol_markup};

#[derive(Clone, Default)]
pub struct Diagnostics {
    markup: Option<Arc<dyn MarkupSink>>,
    bus: Option<DiagnosticBus>,
}

impl Diagnostics {
    /// No markup, no bus. Link events still reach the tracing log.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn with_markup(mut self, sink: Arc<dyn MarkupSink>) -> Self {
        self.markup = Some(sink);
        self
    }

    pub fn with_bus(mut self, bus: DiagnosticBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn bus(&self) -> Option<&DiagnosticBus> {
        self.bus.as_ref()
    }

    pub fn markup_enabled(&self) -> bool {
        self.markup.is_some()
    }

    /// Render and emit `frame`. Does nothing when markup is off.
    pub fn markup(&self, source: MarkupSource, frame: &[u8]) {
        if frame.is_empty() {
            return;
        }
        if let Some(sink) = &self.markup {
            sink.emit(source, &protocol_markup(frame, source));
        }
    }

    pub fn link_event(&self, source: &str, event: LinkEvent) {
        info!(component = source, ?event, "Link event");
        if let Some(bus) = &self.bus {
            bus.publish_to(
                Topic::Link,
                DiagnosticEvent::now(source, DiagnosticPayload::Link(event)),
            );
        }
    }

    pub fn telemetry(&self, source: &str, snapshot: Telemetry) {
        if let Some(bus) = &self.bus {
            bus.publish_to(
                Topic::Telemetry,
                DiagnosticEvent::now(source, DiagnosticPayload::Telemetry(snapshot)),
            );
        }
    }
}

impl std::fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Diagnostics")
            .field("markup", &self.markup.is_some())
            .field("bus", &self.bus.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<String>>);

    impl MarkupSink for Collect {
        fn emit(&self, _source: MarkupSource, line: &str) {
            self.0.lock().push(line.to_string());
        }
    }

    #[test]
    fn markup_reaches_the_sink() {
        let sink = Arc::new(Collect::default());
        let diagnostics = Diagnostics::disabled().with_markup(sink.clone());
        diagnostics.markup(MarkupSource::WiredOut, &[0x01, 0x42, 0x05, b'C', 0xAA]);
        diagnostics.markup(MarkupSource::WiredOut, &[]);
        let lines = sink.0.lock();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("CS:0xAA"));
    }

    #[test]
    fn link_events_go_to_the_bus() {
        let bus = DiagnosticBus::default();
        let mut rx = bus.subscribe_to(Topic::Link);
        let diagnostics = Diagnostics::disabled().with_bus(bus);
        diagnostics.link_event("discovery", LinkEvent::ScanMiss);
        let event = rx.try_recv().expect("link event");
        assert_eq!(event.payload, DiagnosticPayload::Link(LinkEvent::ScanMiss));
    }

    #[test]
    fn disabled_diagnostics_are_silent() {
        let diagnostics = Diagnostics::disabled();
        assert!(!diagnostics.markup_enabled());
        diagnostics.telemetry("scheduler", Telemetry::default());
        assert!(diagnostics.bus().is_none());
    }
}
