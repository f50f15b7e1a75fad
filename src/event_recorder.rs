use ahash::AHashMap;
use crossbeam_channel::{Receiver, Sender};
use indoc::formatdoc;
use log::debug;

use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;

use crate::parser::chunk_parser::ChunkSummary;
use crate::parser::value::{Number, Value, ValueField};
use crate::parser::{EventSink, EventSinkFactory, ValueInterpretation};
use crate::utils::{pretty_bytes_size, pretty_nanos_duration};

const DURATION_FIELD: &str = "duration";

/// Setting events name the event type they configure by its numeric id.
const SETTING_EVENT_TYPES: [&str; 2] = ["jdk.ActiveSetting", "com.oracle.jdk.ActiveSetting"];
const SETTING_ID_FIELD: &str = "id";

/// Events counted by one sink over one chunk.
#[derive(Debug, Clone)]
pub struct EventTally {
    pub identifier: Arc<str>,
    pub label: Arc<str>,
    pub category: Arc<str>,
    pub count: u64,
    pub total_duration_nanos: u64,
}

#[derive(Debug)]
pub enum RecorderMessage {
    Tally { chunk: usize, tally: EventTally },
    ChunkDecoded { chunk: usize, summary: ChunkSummary },
    ChunkFailed { chunk: usize, message: String },
}

/// Creates the counting sinks of one chunk.
pub struct TallySinkFactory {
    chunk: usize,
    send_messages: Sender<RecorderMessage>,
}

impl TallySinkFactory {
    pub fn new(chunk: usize, send_messages: Sender<RecorderMessage>) -> Self {
        Self {
            chunk,
            send_messages,
        }
    }
}

impl EventSinkFactory for TallySinkFactory {
    fn value_interpretation(&self, event_type: &str, field: &str) -> Option<ValueInterpretation> {
        (field == SETTING_ID_FIELD && SETTING_EVENT_TYPES.contains(&event_type))
            .then_some(ValueInterpretation::TypeIdentifier)
    }

    fn create(
        &self,
        identifier: &str,
        label: &str,
        category: &[Arc<str>],
        _description: Option<&str>,
        fields: &[ValueField],
    ) -> Box<dyn EventSink> {
        let category = category
            .iter()
            .map(|c| &**c)
            .collect::<Vec<_>>()
            .join(" / ");
        Box::new(TallySink {
            chunk: self.chunk,
            duration_slot: fields
                .iter()
                .position(|f| &*f.identifier == DURATION_FIELD),
            tally: EventTally {
                identifier: Arc::from(identifier),
                label: Arc::from(label),
                category: Arc::from(category),
                count: 0,
                total_duration_nanos: 0,
            },
            send_messages: self.send_messages.clone(),
        })
    }
}

/// Counts events and sums their durations, reporting once when dropped with the chunk.
struct TallySink {
    chunk: usize,
    duration_slot: Option<usize>,
    tally: EventTally,
    send_messages: Sender<RecorderMessage>,
}

impl EventSink for TallySink {
    fn add_event(&mut self, values: &[Value]) {
        self.tally.count += 1;
        if let Some(Value::Quantity {
            number: Number::Integer(nanos),
            ..
        }) = self.duration_slot.and_then(|slot| values.get(slot))
        {
            self.tally.total_duration_nanos += (*nanos).max(0) as u64;
        }
    }
}

impl Drop for TallySink {
    fn drop(&mut self) {
        if self.tally.count == 0 {
            return;
        }
        let tally = EventTally {
            identifier: self.tally.identifier.clone(),
            label: self.tally.label.clone(),
            category: self.tally.category.clone(),
            count: self.tally.count,
            total_duration_nanos: self.tally.total_duration_nanos,
        };
        // the recorder may already be gone when the driver bails out
        self.send_messages
            .send(RecorderMessage::Tally {
                chunk: self.chunk,
                tally,
            })
            .unwrap_or_default();
    }
}

#[derive(Debug, Clone)]
pub struct EventTypeStats {
    pub label: Arc<str>,
    pub category: Arc<str>,
    pub count: u64,
    pub total_duration_nanos: u64,
}

#[derive(Debug)]
pub struct EventRecorder {
    top: usize,
    chunks_decoded: usize,
    failed_chunks: Vec<(usize, String)>,
    total_events: u64,
    total_constants: usize,
    recording_bytes: u64,
    start_time_nanos: Option<i64>,
    duration_nanos: u64,
    // tallies of chunks still being decoded, dropped if the chunk fails
    pending: AHashMap<usize, Vec<EventTally>>,
    event_types: AHashMap<Arc<str>, EventTypeStats>,
}

impl EventRecorder {
    pub fn new(top: usize) -> Self {
        EventRecorder {
            top,
            chunks_decoded: 0,
            failed_chunks: Vec::new(),
            total_events: 0,
            total_constants: 0,
            recording_bytes: 0,
            start_time_nanos: None,
            duration_nanos: 0,
            pending: AHashMap::new(),
            event_types: AHashMap::new(),
        }
    }

    pub fn start(
        mut self,
        receive_messages: Receiver<RecorderMessage>,
        send_result: Sender<Self>,
    ) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("event-recorder".to_string())
            .spawn(move || {
                // ends once every sender is dropped
                while let Ok(message) = receive_messages.recv() {
                    self.record(message);
                }
                send_result
                    .send(self)
                    .expect("channel should not be closed");
            })
    }

    pub fn record(&mut self, message: RecorderMessage) {
        match message {
            RecorderMessage::Tally { chunk, tally } => {
                self.pending.entry(chunk).or_default().push(tally);
            }
            RecorderMessage::ChunkDecoded { chunk, summary } => {
                self.chunks_decoded += 1;
                self.total_events += summary.num_events;
                self.total_constants += summary.num_constants;
                self.recording_bytes += summary.header.chunk_size.max(0) as u64;
                self.duration_nanos += summary.header.duration_nanos.max(0) as u64;
                let start = summary.header.start_time_nanos;
                self.start_time_nanos = Some(self.start_time_nanos.map_or(start, |s| s.min(start)));
                for tally in self.pending.remove(&chunk).unwrap_or_default() {
                    let stats = self
                        .event_types
                        .entry(tally.identifier.clone())
                        .or_insert_with(|| EventTypeStats {
                            label: tally.label.clone(),
                            category: tally.category.clone(),
                            count: 0,
                            total_duration_nanos: 0,
                        });
                    stats.count += tally.count;
                    stats.total_duration_nanos += tally.total_duration_nanos;
                }
            }
            RecorderMessage::ChunkFailed { chunk, message } => {
                let dropped = self.pending.remove(&chunk).map_or(0, |t| t.len());
                debug!(chunk = chunk, dropped_tallies = dropped; "discarding events of failed chunk");
                self.failed_chunks.push((chunk, message));
            }
        }
    }

    pub fn chunks_decoded(&self) -> usize {
        self.chunks_decoded
    }

    pub fn failed_chunks(&self) -> &[(usize, String)] {
        &self.failed_chunks
    }

    pub fn total_events(&self) -> u64 {
        self.total_events
    }

    pub fn event_type(&self, identifier: &str) -> Option<&EventTypeStats> {
        self.event_types.get(identifier)
    }

    /// Event types by decreasing count, ties broken by identifier.
    pub fn event_types_by_count(&self) -> Vec<(&Arc<str>, &EventTypeStats)> {
        let mut types: Vec<_> = self.event_types.iter().collect();
        types.sort_by(|a, b| b.1.count.cmp(&a.1.count).then_with(|| a.0.cmp(b.0)));
        types
    }

    // Render table from [(count, total_duration, category, label)]
    fn render_table(top: usize, analysis: &mut String, rows: &[(u64, String, String, String)]) {
        let rows: Vec<_> = rows.iter().take(top).collect();

        let count_header = "Events";
        let count_padding =
            EventRecorder::padding_for_header(&rows, |r| r.0.to_string(), count_header);
        let count_len = count_header.chars().count() + count_padding.chars().count();

        let duration_header = "Total duration";
        let duration_padding =
            EventRecorder::padding_for_header(&rows, |r| r.1.clone(), duration_header);
        let duration_len = duration_header.chars().count() + duration_padding.chars().count();

        let category_header = "Category";
        let category_padding =
            EventRecorder::padding_for_header(&rows, |r| r.2.clone(), category_header);
        let category_len = category_header.chars().count() + category_padding.chars().count();

        let header = format!(
            "{}{} | {}{} | {}{} | Event type\n",
            count_padding,
            count_header,
            duration_padding,
            duration_header,
            category_header,
            category_padding,
        );
        let header_len = header.chars().count();
        analysis.push_str(&header);
        analysis.push_str(&("-".repeat(header_len)));
        analysis.push('\n');

        for (count, duration, category, label) in rows {
            let row = format!(
                "{}{} | {}{} | {}{} | {}\n",
                EventRecorder::column_padding(&count.to_string(), count_len),
                count,
                EventRecorder::column_padding(duration, duration_len),
                duration,
                category,
                EventRecorder::column_padding(category, category_len),
                label
            );
            analysis.push_str(&row);
        }
    }

    fn padding_for_header<R, F>(rows: &[R], field_selector: F, header_label: &str) -> String
    where
        F: Fn(&R) -> String,
    {
        let max_elem_size = rows
            .iter()
            .map(|r| field_selector(r).chars().count())
            .max()
            .unwrap_or(0);

        EventRecorder::column_padding(header_label, max_elem_size)
    }

    fn column_padding(column_name: &str, max_item_length: usize) -> String {
        let column_label_len = column_name.chars().count();
        let padding_size = max_item_length.saturating_sub(column_label_len);
        " ".repeat(padding_size)
    }

    fn render_event_types(&self) -> String {
        if self.event_types.is_empty() {
            return "No events recorded.\n".to_string();
        }
        let rows: Vec<_> = self
            .event_types_by_count()
            .into_iter()
            .map(|(identifier, stats)| {
                let duration = if stats.total_duration_nanos == 0 {
                    "-".to_string()
                } else {
                    pretty_nanos_duration(stats.total_duration_nanos)
                };
                (
                    stats.count,
                    duration,
                    stats.category.to_string(),
                    format!("{} ({})", stats.label, identifier),
                )
            })
            .collect();
        let mut analysis = format!(
            "Top {} event types by count:\n\n",
            self.top.min(rows.len())
        );
        EventRecorder::render_table(self.top, &mut analysis, &rows);
        analysis
    }

    fn render_failed_chunks(&self) -> String {
        let mut failed = self.failed_chunks.clone();
        failed.sort();
        failed
            .iter()
            .map(|(chunk, message)| format!("..chunk #{}: {}\n", chunk, message))
            .collect()
    }

    pub fn render_summary(&self) -> String {
        let top_summary = formatdoc!(
            "\nRecording summary:\n
            Chunks decoded: {}
            Chunks failed: {}
            Recording size: {}
            Recording duration: {}
            Start time (epoch ns): {}
            Event types: {}
            Events: {}
            Constants: {}",
            self.chunks_decoded,
            self.failed_chunks.len(),
            pretty_bytes_size(self.recording_bytes),
            pretty_nanos_duration(self.duration_nanos),
            self.start_time_nanos
                .map_or_else(|| "-".to_string(), |s| s.to_string()),
            self.event_types.len(),
            self.total_events,
            self.total_constants,
        );

        let mut summary = format!("{}\n\n{}", top_summary, self.render_event_types());
        if !self.failed_chunks.is_empty() {
            summary.push_str("\nFailed chunks:\n");
            summary.push_str(&self.render_failed_chunks());
        }
        summary
    }
}
