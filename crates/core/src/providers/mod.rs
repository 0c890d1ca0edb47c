pub mod openai;

pub use openai::{OpenAiChat, OpenAiCredentials, OpenAiEmbeddings, DEFAULT_BASE_URL};
