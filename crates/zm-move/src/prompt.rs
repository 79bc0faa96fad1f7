use tracing::info;

/// Decides whether a move may proceed past a safety prompt.
///
/// The engine never reads stdin itself; the binary injects a terminal
/// implementation and `--force` injects [`AssumeYes`].
pub trait Confirmer: Send + Sync {
    /// Show text the user should read before the next prompt.
    fn present(&self, text: &str);

    /// Ask a yes/no question. `prompt` carries no trailing `?`.
    fn confirm(&self, prompt: &str) -> bool;
}

/// Accepts every prompt without asking.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeYes;

impl Confirmer for AssumeYes {
    fn present(&self, text: &str) {
        for line in text.lines() {
            info!("{line}");
        }
    }

    fn confirm(&self, prompt: &str) -> bool {
        info!(prompt, "confirmed by --force");
        true
    }
}
