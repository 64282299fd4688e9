//! Worker pool and hot-reloadable serving loop implementing spec §5's
//! "parallel worker pool, each worker running a cooperative event loop":
//! one OS thread per core runs its own `monoio` runtime and owns a private
//! copy of every endpoint's service chain; [`Manager`] broadcasts
//! [`Command`]s (built, torn down, or hot-swapped service factories) to all
//! workers and collects their results.

use std::fmt::Debug;

use futures_channel::oneshot::Sender as OSender;
use monoio::io::stream::Stream;
use service_async::Service;
use tracing::{debug, error, info, warn};

use self::runtime::RuntimeWrapper;

mod endpoint;
mod manager;
mod runtime;

pub use endpoint::{Command, Execute, EndpointHandler, HandlerSlot, Update, WorkerController};
pub use manager::{JoinHandlesWithOutput, Manager};

pub struct ResultGroup<T, E>(Vec<Result<T, E>>);

impl<T, E> From<Vec<Result<T, E>>> for ResultGroup<T, E> {
    fn from(value: Vec<Result<T, E>>) -> Self {
        Self(value)
    }
}

impl<T, E> From<ResultGroup<T, E>> for Vec<Result<T, E>> {
    fn from(value: ResultGroup<T, E>) -> Self {
        value.0
    }
}

impl<E> ResultGroup<(), E> {
    pub fn err(self) -> Result<(), E> {
        for r in self.0.into_iter() {
            r?;
        }
        Ok(())
    }
}

/// Drives one endpoint's accept loop until either the listener closes or the
/// worker is told to stop (graceful shutdown per spec §5's cancellation
/// model: pending accepts are simply dropped, in-flight connections are left
/// to finish on their own).
pub async fn serve<S, Svc, A, E>(mut listener: S, handler: HandlerSlot<Svc>, mut stop: OSender<()>)
where
    S: Stream<Item = Result<A, E>> + 'static,
    E: Debug,
    Svc: Service<A> + 'static,
    Svc::Error: Debug,
    A: 'static,
{
    let mut cancellation = stop.cancellation();
    loop {
        monoio::select! {
            _ = &mut cancellation => {
                info!("endpoint is notified to stop");
                break;
            }
            accept_opt = listener.next() => {
                let accept = match accept_opt {
                    Some(accept) => accept,
                    None => {
                        info!("listener is closed, serve stopped");
                        return;
                    }
                };
                match accept {
                    Ok(accept) => {
                        let svc = handler.get_svc();
                        monoio::spawn(async move {
                            match svc.call(accept).await {
                                Ok(_) => {
                                    debug!("connection complete");
                                }
                                Err(e) => {
                                    error!("connection error: {e:?}");
                                }
                            }
                        });
                    }
                    Err(e) => warn!("accept connection failed: {e:?}"),
                }
            }
        }
    }
}
