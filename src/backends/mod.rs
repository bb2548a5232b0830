pub mod model_runner;

pub mod ollama;
