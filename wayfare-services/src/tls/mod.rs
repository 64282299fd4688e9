//! Dual-stack TLS termination (spec §6's PEM-loaded material, parsed by
//! `wayfare_core::tls`): picks the rustls or native-tls acceptor per
//! listener based on `wayfare_core::tls::TlsConfig`, or passes the stream
//! through untouched when the endpoint has no TLS configured.

mod nativetls;
mod rustls;

use native_tls::Identity;
use service_async::{
    layer::{layer_fn, FactoryLayer},
    MakeService, Param, Service,
};
use wayfare_core::AnyError;

pub use self::{
    nativetls::{NativeTlsService, NativeTlsServiceFactory},
    rustls::{RustlsService, RustlsServiceFactory},
};

pub type TlsConfig = wayfare_core::tls::TlsConfig;

pub enum UnifiedTlsService<T> {
    Rustls(RustlsService<T>),
    Native(NativeTlsService<T>),
    None(T),
}

impl<T> UnifiedTlsService<T> {
    fn as_rustls(this: Option<&Self>) -> Option<&RustlsService<T>> {
        this.and_then(|s| match s {
            UnifiedTlsService::Rustls(inner) => Some(inner),
            _ => None,
        })
    }

    fn as_native(this: Option<&Self>) -> Option<&NativeTlsService<T>> {
        this.and_then(|s| match s {
            UnifiedTlsService::Native(inner) => Some(inner),
            _ => None,
        })
    }

    fn as_none(this: Option<&Self>) -> Option<&T> {
        this.and_then(|s| match s {
            UnifiedTlsService::None(inner) => Some(inner),
            _ => None,
        })
    }
}

pub enum UnifiedResponse<A, B, C> {
    Rustls(A),
    Native(B),
    None(C),
}

impl<A> UnifiedResponse<A, A, A> {
    pub fn into_inner(self) -> A {
        match self {
            UnifiedResponse::Rustls(inner) => inner,
            UnifiedResponse::Native(inner) => inner,
            UnifiedResponse::None(inner) => inner,
        }
    }
}

impl<T, S, A> Service<(S, A)> for UnifiedTlsService<T>
where
    RustlsService<T>: Service<(S, A)>,
    NativeTlsService<T>: Service<(S, A)>,
    <RustlsService<T> as Service<(S, A)>>::Error: Into<AnyError>,
    <NativeTlsService<T> as Service<(S, A)>>::Error: Into<AnyError>,
    T: Service<(S, A)>,
    T::Error: Into<AnyError>,
{
    type Response = UnifiedResponse<
        <RustlsService<T> as Service<(S, A)>>::Response,
        <NativeTlsService<T> as Service<(S, A)>>::Response,
        T::Response,
    >;
    type Error = AnyError;

    async fn call(&self, req: (S, A)) -> Result<Self::Response, Self::Error> {
        match self {
            UnifiedTlsService::Rustls(inner) => inner
                .call(req)
                .await
                .map(UnifiedResponse::Rustls)
                .map_err(Into::into),
            UnifiedTlsService::Native(inner) => inner
                .call(req)
                .await
                .map(UnifiedResponse::Native)
                .map_err(Into::into),
            UnifiedTlsService::None(inner) => inner
                .call(req)
                .await
                .map(UnifiedResponse::None)
                .map_err(Into::into),
        }
    }
}

#[derive(Clone)]
pub enum UnifiedTlsFactory<F> {
    Rustls(RustlsServiceFactory<F>),
    Native(NativeTlsServiceFactory<F>),
    None(F),
}

impl<F> MakeService for UnifiedTlsFactory<F>
where
    RustlsServiceFactory<F>: MakeService<Service = RustlsService<F::Service>>,
    NativeTlsServiceFactory<F>: MakeService<Service = NativeTlsService<F::Service>, Error = AnyError>,
    <RustlsServiceFactory<F> as MakeService>::Error: Into<AnyError>,
    <NativeTlsServiceFactory<F> as MakeService>::Error: Into<AnyError>,
    F: MakeService,
    F::Error: Into<AnyError>,
{
    type Service = UnifiedTlsService<F::Service>;
    type Error = AnyError;

    fn make_via_ref(&self, old: Option<&Self::Service>) -> Result<Self::Service, Self::Error> {
        match self {
            UnifiedTlsFactory::Rustls(inner) => inner
                .make_via_ref(UnifiedTlsService::as_rustls(old))
                .map(UnifiedTlsService::Rustls)
                .map_err(Into::into),
            UnifiedTlsFactory::Native(inner) => inner
                .make_via_ref(UnifiedTlsService::as_native(old))
                .map(UnifiedTlsService::Native)
                .map_err(Into::into),
            UnifiedTlsFactory::None(inner) => inner
                .make_via_ref(UnifiedTlsService::as_none(old))
                .map(UnifiedTlsService::None)
                .map_err(Into::into),
        }
    }
}

impl<F> UnifiedTlsFactory<F> {
    pub fn layer<C>() -> impl FactoryLayer<C, F, Factory = Self>
    where
        C: Param<TlsConfig>,
    {
        layer_fn::<C, _, _, _>(|c, inner| match c.param() {
            TlsConfig::Rustls(cfg) => Self::Rustls(
                RustlsServiceFactory::layer::<ConstParam<rustls::ServerConfig>>()
                    .layer(&ConstParam(cfg), inner),
            ),
            TlsConfig::Native(identity) => Self::Native(
                NativeTlsServiceFactory::layer::<ConstParam<Identity>>()
                    .layer(&ConstParam(identity), inner),
            ),
            TlsConfig::None => Self::None(inner),
        })
    }
}

/// Adapts an already-resolved value into the `Param` a sub-factory's
/// `layer::<C>()` expects, since `TlsConfig`'s variants carry the concrete
/// rustls/native-tls types directly rather than a generic context.
struct ConstParam<T>(T);

impl<T: Clone> Param<T> for ConstParam<T> {
    fn param(&self) -> T {
        self.0.clone()
    }
}
