use clap::Parser;

/// Terminal chat with three AI personas backed by one Gemini model.
#[derive(Debug, Parser)]
#[command(name = "trichat")]
#[command(version)]
#[command(about = "Terminal chat with three AI personas backed by one Gemini model", long_about = None)]
pub struct Args {
    /// Model name
    #[arg(short = 'm', long = "model")]
    pub model: Option<String>,

    /// Backend ("google" or "stub"; default: config/provider or "google")
    #[arg(long = "provider")]
    pub provider: Option<String>,

    /// Persona to open first (gemini, chatgpt, deepseek)
    #[arg(long = "chat")]
    pub chat: Option<String>,
}
