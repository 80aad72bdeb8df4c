use crate::generator::ComicGenerator;
use crate::providers::Provider;
use crate::raster::RenderContext;
use crate::settings::Settings;

pub(crate) struct ServerState<P: Provider> {
    pub(crate) settings: Settings,
    pub(crate) render: RenderContext,
    /// `None` when no API key is configured; only the compositing routes work then.
    pub(crate) generator: Option<ComicGenerator<P>>,
}
