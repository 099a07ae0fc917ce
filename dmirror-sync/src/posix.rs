use systemd_journal_logger::{connected_to_journal, JournalLog};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub fn init_logging() {
    if connected_to_journal() {
        let installed = JournalLog::new().and_then(|journal| {
            journal
                .add_extra_field("VERSION", env!("CARGO_PKG_VERSION"))
                .install()
                .map_err(std::io::Error::other)
        });
        match installed {
            Ok(()) => {
                log::set_max_level(log::LevelFilter::Info);
                return;
            }
            Err(err) => eprintln!("could not log to the journal: {err}"),
        }
    }
    env_logger::init();
}

/// Cancels the sync on SIGTERM or SIGINT.
/// Entries already started complete, the others are left untouched.
pub fn handle_shutdown_signals(cancel: CancellationToken) -> JoinHandle<()> {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let term = signal(SignalKind::terminate());
        let int = signal(SignalKind::interrupt());
        let (mut sig_term, mut sig_int) = match (term, int) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(err), _) | (_, Err(err)) => {
                log::error!("could not install signal handlers: {err}");
                return;
            }
        };
        tokio::select! {
            _ = sig_term.recv() => {
                log::warn!("received SIGTERM");
            }
            _ = sig_int.recv() => {
                log::warn!("received SIGINT");
            }
        };
        cancel.cancel();
    })
}
