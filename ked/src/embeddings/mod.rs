mod api;
mod provider;


pub use api::EmbeddingApiClient;
pub use provider::EmbeddingProvider;
