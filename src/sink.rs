use crate::types::{HealthEvent, MetricSample, Severity};
use crossterm::style::{Color, Stylize};
use regex::Regex;
use std::hash::{Hash, Hasher};
use tokio::sync::mpsc;

/// Consumer of everything the monitor produces. Fire-and-forget: buffering is
/// the implementation's concern.
pub trait EventSink: Send + Sync {
    fn emit_event(&self, event: HealthEvent);
    fn emit_sample(&self, sample: MetricSample);
}

#[derive(Debug, Clone, PartialEq)]
pub enum Emitted {
    Event(HealthEvent),
    Sample(MetricSample),
}

/// Forwards into an unbounded channel drained by [`print_emitted`].
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Emitted>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Emitted>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit_event(&self, event: HealthEvent) {
        // Receiver gone means we are shutting down.
        let _ = self.tx.send(Emitted::Event(event));
    }

    fn emit_sample(&self, sample: MetricSample) {
        let _ = self.tx.send(Emitted::Sample(sample));
    }
}

/// Print emitted items to stdout until the channel closes.
pub async fn print_emitted(mut rx: mpsc::UnboundedReceiver<Emitted>, grep: Option<Regex>) {
    while let Some(item) = rx.recv().await {
        if let Some(ref regex) = grep
            && !regex.is_match(&plain_text(&item))
        {
            continue;
        }
        println!("{}", render(&item));
    }
}

fn plain_text(item: &Emitted) -> String {
    match item {
        Emitted::Event(ev) => format!("{} {}", ev.severity, ev.message),
        Emitted::Sample(s) => format!("{} {}", s.source, s.value),
    }
}

fn render(item: &Emitted) -> String {
    match item {
        Emitted::Event(ev) => {
            let prefix = format!("[{}]", ev.source).with(get_color(ev.source.pod()));
            let label = format!("{} detected", ev.severity).with(severity_color(ev.severity));
            format!(
                "{} {} {} : {}",
                prefix,
                ev.timestamp.to_rfc3339(),
                label,
                ev.message
            )
        }
        Emitted::Sample(s) => {
            let prefix = format!("[{}]", s.source).with(get_color(s.source.pod()));
            format!("{} {} {}", prefix, s.timestamp.to_rfc3339(), s.value)
        }
    }
}

pub fn severity_color(severity: Severity) -> Color {
    match severity {
        Severity::Warning => Color::Yellow,
        Severity::Error => Color::Red,
        Severity::Fail => Color::Magenta,
        Severity::Ignored => Color::Grey,
    }
}

/// Stable color for a pod name, so its lines are easy to follow.
pub fn get_color(s: &str) -> Color {
    let colors = [
        Color::Green,
        Color::Blue,
        Color::Cyan,
        Color::White,
        Color::AnsiValue(92), // Bright Green
        Color::AnsiValue(94), // Bright Blue
        Color::AnsiValue(96), // Bright Cyan
    ];
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    s.hash(&mut hasher);
    let hash = hasher.finish() as u32;
    colors[(hash % colors.len() as u32) as usize]
}
