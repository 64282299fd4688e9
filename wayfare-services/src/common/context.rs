//! Inserts the per-connection [`PeerAddr`] into the context each accepted
//! connection carries through the service stack, using the concrete
//! `certain_map` context defined in `wayfare_core::context`.

use certain_map::ParamSet;
use service_async::{
    layer::{layer_fn, FactoryLayer},
    AsyncMakeService, MakeService, Service,
};
use wayfare_core::{
    context::{Context, EmptyContext, PeerAddr},
    listener::AcceptedAddr,
};

#[derive(Debug, Clone, Copy)]
pub struct ContextService<T> {
    pub inner: T,
}

impl<R, T> Service<(R, AcceptedAddr)> for ContextService<T>
where
    T: Service<(R, Context)>,
{
    type Response = T::Response;
    type Error = T::Error;

    async fn call(&self, (req, addr): (R, AcceptedAddr)) -> Result<Self::Response, Self::Error> {
        let ctx = EmptyContext::new().param_set(PeerAddr(addr));
        self.inner.call((req, ctx)).await
    }
}

impl<F> ContextService<F> {
    pub fn layer<C>() -> impl FactoryLayer<C, F, Factory = Self> {
        layer_fn(|_: &C, inner| ContextService { inner })
    }
}

impl<F: MakeService> MakeService for ContextService<F> {
    type Service = ContextService<F::Service>;
    type Error = F::Error;

    fn make_via_ref(&self, old: Option<&Self::Service>) -> Result<Self::Service, Self::Error> {
        Ok(ContextService {
            inner: self.inner.make_via_ref(old.map(|o| &o.inner))?,
        })
    }
}

impl<F: AsyncMakeService> AsyncMakeService for ContextService<F> {
    type Service = ContextService<F::Service>;
    type Error = F::Error;

    async fn make_via_ref(
        &self,
        old: Option<&Self::Service>,
    ) -> Result<Self::Service, Self::Error> {
        Ok(ContextService {
            inner: self.inner.make_via_ref(old.map(|o| &o.inner)).await?,
        })
    }
}
