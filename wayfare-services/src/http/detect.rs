//! HTTP/2 preface detection ahead of [`super::core::HttpCoreService`], so one
//! listener can serve both HTTP/1.x and HTTP/2 without a separate port.

use service_async::{
    layer::{layer_fn, FactoryLayer},
    AsyncMakeService, MakeService,
};

use crate::common::{DetectService, PrefixDetector};

const PREFACE: &[u8; 24] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

#[derive(Clone)]
pub struct H2Detect<T> {
    inner: T,
}

impl<F: MakeService> MakeService for H2Detect<F> {
    type Service = DetectService<PrefixDetector, F::Service>;
    type Error = F::Error;

    fn make_via_ref(&self, old: Option<&Self::Service>) -> Result<Self::Service, Self::Error> {
        Ok(DetectService {
            inner: self.inner.make_via_ref(old.map(|o| &o.inner))?,
            detector: PrefixDetector(PREFACE),
        })
    }
}

impl<F: AsyncMakeService> AsyncMakeService for H2Detect<F> {
    type Service = DetectService<PrefixDetector, F::Service>;
    type Error = F::Error;

    async fn make_via_ref(
        &self,
        old: Option<&Self::Service>,
    ) -> Result<Self::Service, Self::Error> {
        Ok(DetectService {
            inner: self.inner.make_via_ref(old.map(|o| &o.inner)).await?,
            detector: PrefixDetector(PREFACE),
        })
    }
}

impl<F> H2Detect<F> {
    pub fn layer<C>() -> impl FactoryLayer<C, F, Factory = Self> {
        layer_fn(|_: &C, inner| H2Detect { inner })
    }
}
