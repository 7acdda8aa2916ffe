use indicatif::ProgressStyle;
use scan_cache::ScanEvent;
use tracing::{Span, info_span};
use tracing_indicatif::span_ext::IndicatifSpanExt;

fn download_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} {msg}\n[{elapsed_precise}] [{bar:40.green/white}] {bytes}/{total_bytes} @ {bytes_per_sec}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

/// Renders scan lifecycle events as a progress bar attached to a tracing
/// span, so log lines written through the indicatif layer do not tear it.
pub struct ProgressManager {
    span: Option<Span>,
    disabled: bool,
}

impl ProgressManager {
    pub fn new() -> Self {
        Self {
            span: None,
            disabled: false,
        }
    }

    pub fn new_disabled() -> Self {
        Self {
            span: None,
            disabled: true,
        }
    }

    pub fn handle_event(&mut self, event: &ScanEvent) {
        if self.disabled {
            return;
        }

        match event {
            ScanEvent::ScansLoading { id, progress } => {
                let span = self.span.get_or_insert_with(|| {
                    let span = info_span!("download", scan = %id);
                    span.pb_set_style(&download_style());
                    span.pb_set_message(&format!("Downloading scan {id}"));
                    span.pb_start();
                    span
                });
                if let Some(total) = progress.total_bytes {
                    span.pb_set_length(total);
                }
                span.pb_set_position(progress.bytes_downloaded);
            }
            // Closing the span clears its bar
            ScanEvent::ScanBundleCached(_)
            | ScanEvent::ScanLoadCancelled(_)
            | ScanEvent::ScanLoadFailed { .. } => {
                self.span.take();
            }
            _ => {}
        }
    }
}
