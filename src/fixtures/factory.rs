//! Factory contract: a factory runs setup, yields exactly one value, then runs teardown once resumed.
//!
//! A factory is an async function receiving its resolved arguments and a [`Yielder`]. Calling
//! [`Yielder::provide`] hands the value to the engine and suspends the factory until the owning
//! scope ends. Because `provide` consumes the yielder, a factory cannot yield twice. A factory that
//! returns without yielding is reported as malformed.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::oneshot;

use super::args::{FixtureArgs, FixtureValue};

pub type FactoryFuture = BoxFuture<'static, miette::Result<()>>;

/// Type-erased factory stored in a definition.
pub type FactoryFn = Arc<dyn Fn(FixtureArgs, Yielder) -> FactoryFuture + Send + Sync>;

/// Handle a factory uses to provide its single value.
#[derive(Debug)]
pub struct Yielder {
    value_tx: oneshot::Sender<FixtureValue>,
    resume_rx: oneshot::Receiver<()>,
}

/// Engine side of a [`Yielder`].
#[derive(Debug)]
pub(crate) struct Provided {
    pub(crate) value_rx: oneshot::Receiver<FixtureValue>,
    pub(crate) resume_tx: oneshot::Sender<()>,
}

impl Yielder {
    pub(crate) fn channel() -> (Yielder, Provided) {
        let (value_tx, value_rx) = oneshot::channel();
        let (resume_tx, resume_rx) = oneshot::channel();
        (
            Yielder {
                value_tx,
                resume_rx,
            },
            Provided {
                value_rx,
                resume_tx,
            },
        )
    }

    /// Provide `value` and wait until the owning scope tears the fixture down.
    pub async fn provide<T: Any + Send + Sync>(self, value: T) {
        self.provide_shared(Arc::new(value)).await;
    }

    /// Provide an already shared value.
    pub async fn provide_shared(self, value: FixtureValue) {
        if self.value_tx.send(value).is_err() {
            return;
        }
        // A dropped sender also means "tear down now".
        let _ = self.resume_rx.await;
    }
}

/// Erase a typed factory closure.
pub(crate) fn factory_fn<F, Fut>(factory: F) -> FactoryFn
where
    F: Fn(FixtureArgs, Yielder) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = miette::Result<()>> + Send + 'static,
{
    Arc::new(move |args: FixtureArgs, yielder: Yielder| -> FactoryFuture { Box::pin(factory(args, yielder)) })
}

/// Erase a factory that only produces a value and has no teardown.
pub(crate) fn value_fn<F, Fut, T>(make: F) -> FactoryFn
where
    F: Fn(FixtureArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = miette::Result<T>> + Send + 'static,
    T: Any + Send + Sync,
{
    let make = Arc::new(make);
    Arc::new(move |args: FixtureArgs, yielder: Yielder| -> FactoryFuture {
        let make = make.clone();
        Box::pin(async move {
            let value = make(args).await?;
            yielder.provide(value).await;
            Ok(())
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn provide_suspends_until_resumed() {
        let (yielder, provided) = Yielder::channel();
        let task = tokio::spawn(async move {
            yielder.provide(7_u32).await;
            "torn down"
        });
        let value = provided.value_rx.await.unwrap();
        assert_eq!(value.downcast_ref::<u32>(), Some(&7));
        assert!(!task.is_finished());
        provided.resume_tx.send(()).unwrap();
        assert_eq!(task.await.unwrap(), "torn down");
    }

    #[tokio::test]
    async fn dropped_engine_side_unblocks_factory() {
        let (yielder, provided) = Yielder::channel();
        let task = tokio::spawn(async move { yielder.provide(()).await });
        let _ = provided.value_rx.await.unwrap();
        drop(provided.resume_tx);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn value_factory_yields_its_result() {
        let factory = value_fn(|_args| async { Ok(String::from("hello")) });
        let (yielder, provided) = Yielder::channel();
        let task = tokio::spawn(factory(FixtureArgs::default(), yielder));
        let value = provided.value_rx.await.unwrap();
        assert_eq!(value.downcast_ref::<String>().unwrap(), "hello");
        provided.resume_tx.send(()).unwrap();
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn factory_returning_without_value_drops_sender() {
        let factory = factory_fn(|_args, _yielder| async { Ok(()) });
        let (yielder, provided) = Yielder::channel();
        let task = tokio::spawn(factory(FixtureArgs::default(), yielder));
        assert!(provided.value_rx.await.is_err());
        assert!(task.await.unwrap().is_ok());
    }
}
