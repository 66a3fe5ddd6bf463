use std::sync::atomic::{AtomicBool, Ordering};

static INTERRUPT_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Route Ctrl-C into [`interrupt_requested`]. A second Ctrl-C exits at once.
pub fn install_interrupt_handler() {
    let _ = ctrlc::set_handler(move || {
        if INTERRUPT_REQUESTED.load(Ordering::SeqCst) {
            std::process::exit(1);
        }
        INTERRUPT_REQUESTED.store(true, Ordering::SeqCst);
        eprintln!("\ninterrupt requested, stopping after the current step...");
    });
}

pub fn interrupt_requested() -> bool {
    INTERRUPT_REQUESTED.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_requested_without_signal() {
        assert!(!interrupt_requested());
    }
}
