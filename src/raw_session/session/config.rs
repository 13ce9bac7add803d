use crate::raw_session::rendition::RenditionConfig;

/// Configuration for a decode session
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Large-file threshold handed to the engine when `open_file` gets none.
    /// Opaque to the session; its meaning is defined by the engine.
    pub big_file_threshold: Option<i64>,
    /// TIFF rendition settings used when constructing the default engine
    pub rendition: RenditionConfig,
}

impl SessionConfig {
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionConfigBuilder(SessionConfig);

impl SessionConfigBuilder {
    pub fn big_file_threshold(mut self, threshold: Option<i64>) -> Self {
        self.0.big_file_threshold = threshold;
        self
    }

    pub fn rendition(mut self, rendition: RenditionConfig) -> Self {
        self.0.rendition = rendition;
        self
    }

    pub fn build(self) -> SessionConfig {
        self.0
    }
}
