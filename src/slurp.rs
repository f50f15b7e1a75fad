use std::fs;

use crossbeam_channel::{Receiver, Sender};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, warn};
use rayon::prelude::{IndexedParallelIterator, IntoParallelRefIterator, ParallelIterator};

use crate::errors::OverheadSlurpError;
use crate::event_recorder::{EventRecorder, RecorderMessage, TallySinkFactory};
use crate::parser::chunk_parser::{read_chunk, split_chunks};
use crate::parser::ParserOptions;
use crate::utils::pretty_bytes_size;

pub fn slurp_recording(
    file_path: &str,
    top: usize,
    options: ParserOptions,
) -> Result<EventRecorder, OverheadSlurpError> {
    let data = fs::read(file_path)?;
    let chunks = split_chunks(&data)?;
    println!(
        "Processing {} flight recording made of {} chunk(s).",
        pretty_bytes_size(data.len() as u64),
        chunks.len()
    );
    slurp_chunks(&chunks, top, options)
}

/// Decodes the chunks in parallel, a failing chunk is reported and skipped.
pub fn slurp_chunks(
    chunks: &[&[u8]],
    top: usize,
    options: ParserOptions,
) -> Result<EventRecorder, OverheadSlurpError> {
    // Communication channel from chunk decoders to recorder
    let (send_messages, receive_messages): (Sender<RecorderMessage>, Receiver<RecorderMessage>) =
        crossbeam_channel::unbounded();

    // Communication channel from recorder to main
    let (send_result, receive_result): (Sender<EventRecorder>, Receiver<EventRecorder>) =
        crossbeam_channel::unbounded();

    let recorder_thread = EventRecorder::new(top).start(receive_messages, send_result)?;

    let total_bytes: usize = chunks.iter().map(|c| c.len()).sum();
    let pb = ProgressBar::new(total_bytes as u64);
    pb.set_style(ProgressStyle::default_bar()
        .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} (speed:{bytes_per_sec}) (eta:{eta})")
        .expect("templating should never fail")
        .progress_chars("#>-"));

    chunks
        .par_iter()
        .enumerate()
        .for_each_with(send_messages, |send_messages, (chunk, data)| {
            let factory = TallySinkFactory::new(chunk, send_messages.clone());
            let message = match read_chunk(data, &options, &factory) {
                Ok(summary) => {
                    debug!(chunk = chunk, size = data.len(), events = summary.num_events;
                        "chunk processed");
                    RecorderMessage::ChunkDecoded { chunk, summary }
                }
                Err(e) => {
                    let message = e.to_string();
                    warn!(chunk = chunk, error = message.as_str(); "skipping chunk");
                    RecorderMessage::ChunkFailed { chunk, message }
                }
            };
            send_messages
                .send(message)
                .expect("recorder channel should be alive");
            pb.inc(data.len() as u64);
        });

    // Finish and remove progress bar
    pb.finish_and_clear();

    // Wait for final result, every sender is gone once the parallel loop returns
    let result = receive_result
        .recv()
        .expect("result channel should be alive");

    // Blocks until recorder is done
    recorder_thread
        .join()
        .map_err(|e| OverheadSlurpError::StdThreadError { e })?;

    Ok(result)
}
