pub mod anthropic;
pub mod azure_openai;
pub mod bedrock;
pub mod google;
pub mod google_vertex;
pub mod mock;
pub mod model;
pub mod openai_compat;
pub mod openai_responses;
pub mod registry;
pub mod sse;
pub mod traits;

pub use anthropic::AnthropicProvider;
pub use azure_openai::AzureOpenAiProvider;
pub use bedrock::BedrockProvider;
pub use google::GoogleProvider;
pub use google_vertex::GoogleVertexProvider;
pub use mock::MockProvider;
pub use model::{ApiProtocol, CostConfig, ModelConfig, OpenAiCompat};
pub use openai_compat::OpenAiCompatProvider;
pub use openai_responses::OpenAiResponsesProvider;
pub use registry::ProviderRegistry;
pub use traits::*;
