use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use structpatch::{LastWriterWinsResolver, Patch, PatchBuilder};
use structpatch_condition::log;
use structpatch_value::{deep_copy, Record, RecordType, Value};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::prelude::*;

// ── Capture layer ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct CapturedEvent {
    level: Level,
    fields: BTreeMap<String, String>,
}

impl CapturedEvent {
    fn message(&self) -> Option<&str> {
        self.fields.get("message").map(String::as_str)
    }
}

#[derive(Clone, Default)]
struct Capture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl Capture {
    fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().unwrap().clone()
    }

    fn with_message(&self, message: &str) -> Vec<CapturedEvent> {
        self.events().into_iter().filter(|e| e.message() == Some(message)).collect()
    }
}

struct FieldVisitor<'a>(&'a mut BTreeMap<String, String>);

impl Visit for FieldVisitor<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0.insert(field.name().to_string(), format!("{value:?}"));
    }
}

impl<S: Subscriber> Layer<S> for Capture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut fields = BTreeMap::new();
        event.record(&mut FieldVisitor(&mut fields));
        self.events.lock().unwrap().push(CapturedEvent { level: *event.metadata().level(), fields });
    }
}

fn captured(f: impl FnOnce()) -> Capture {
    let capture = Capture::default();
    let subscriber = tracing_subscriber::registry().with(capture.clone());
    tracing::subscriber::with_default(subscriber, f);
    capture
}

fn doc(name: &str) -> Value {
    let ty = RecordType::new("Doc").field("Name").field("Note").shared();
    Value::Record(Record::new(&ty).with("Name", name).with("Note", ""))
}

// ── Tests ─────────────────────────────────────────────────────────────────

#[test]
fn log_operations_emit_info_events() {
    let base = doc("v1");
    let capture = captured(|| {
        let mut b = PatchBuilder::new(base.clone());
        b.log("/Note", "reached note").unwrap();
        let mut value = deep_copy(&base);
        b.build().unwrap().apply(&mut value).unwrap();
    });

    let events = capture.with_message("patch log");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].level, Level::INFO);
    assert_eq!(events[0].fields.get("path").map(String::as_str), Some("/Note"));
}

#[test]
fn log_conditions_emit_info_events_and_hold() {
    let base = doc("v1");
    let capture = captured(|| {
        let patch = Patch::diff(&base, &doc("v2")).unwrap().with_condition(log("checking doc"));
        let mut value = deep_copy(&base);
        patch.apply_checked(&mut value).unwrap();
        assert_eq!(value, doc("v2"));
    });

    let events = capture.with_message("condition log");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].level, Level::INFO);
}

#[test]
fn resolver_rejections_are_debug_events() {
    let base = doc("v1");
    let capture = captured(|| {
        let mut patch = Patch::diff(&base, &doc("v2")).unwrap();
        patch.stamp(structpatch::Clock::new(1, 0, 1));
        let mut resolver = LastWriterWinsResolver::new()
            .with_clock(structpatch_pointer::parse("/Name"), structpatch::Clock::new(9, 0, 1));
        let mut value = deep_copy(&base);
        patch.apply_resolved(&mut value, &mut resolver).unwrap();
    });

    let rejected = capture.with_message("rejected by last-writer-wins");
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].level, Level::DEBUG);
    assert_eq!(capture.with_message("node skipped").len(), 1);
}
