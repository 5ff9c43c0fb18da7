use std::io::Write as _;

use clap::{Parser, ValueEnum};
use futures_util::StreamExt;
use protobridge::config::{load_config, BridgeConfig};
use protobridge::observability::init_tracing;
use protobridge::protocol::canonical::{
    GenerateRequest, NormalizedResponse, Turn, TurnRole, WireProtocol,
};
use protobridge::routing::ProviderRouter;

/// Send one prompt through the configured provider.
#[derive(Parser, Debug)]
#[command(name = "protobridge", about = "Send a prompt over OpenAI Chat or Responses")]
struct CliArgs {
    /// Path to the YAML config file.
    #[arg(long, default_value = "config.yaml")]
    config: String,

    /// Wire protocol override.
    #[arg(long, value_enum)]
    protocol: Option<ProtocolArg>,

    /// Model name override.
    #[arg(long)]
    model: Option<String>,

    /// Wait for the whole response instead of streaming it.
    #[arg(long)]
    no_stream: bool,

    /// Prompt words, joined with spaces.
    #[arg(required = true, num_args = 1..)]
    prompt: Vec<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ProtocolArg {
    Chat,
    Responses,
}

impl From<ProtocolArg> for WireProtocol {
    fn from(arg: ProtocolArg) -> Self {
        match arg {
            ProtocolArg::Chat => WireProtocol::Chat,
            ProtocolArg::Responses => WireProtocol::Responses,
        }
    }
}

fn print_fragment(fragment: &NormalizedResponse) {
    let mut stdout = std::io::stdout().lock();
    let _ = write!(stdout, "{}", fragment.text());
    for call in fragment.function_calls() {
        let _ = writeln!(
            stdout,
            "\n[tool call] {} {} {}",
            call.id.as_deref().unwrap_or("-"),
            call.name,
            call.args
        );
    }
    if let Some(usage) = fragment.usage_metadata {
        let _ = writeln!(
            stdout,
            "\n[usage] prompt={} output={} total={}",
            usage.prompt_token_count, usage.candidates_token_count, usage.total_token_count
        );
    }
    let _ = stdout.flush();
}

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();

    let config: BridgeConfig = load_config(&args.config).unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {e}");
        eprintln!("Please copy 'config.example.yaml' to 'config.yaml' and modify as needed.");
        std::process::exit(1);
    });

    init_tracing(&config.features.log_level);

    let router = ProviderRouter::new(&config).unwrap_or_else(|e| {
        eprintln!("Failed to initialize provider: {e}");
        std::process::exit(1);
    });
    if let Some(protocol) = args.protocol {
        router.set_protocol(protocol.into());
    }

    tracing::info!(
        model = args.model.as_deref().unwrap_or(&config.provider.model),
        protocol = %router.protocol(),
        "protobridge sending request"
    );

    let request = GenerateRequest {
        model: args.model,
        contents: vec![Turn::text(TurnRole::User, args.prompt.join(" "))],
        ..GenerateRequest::default()
    };

    if args.no_stream {
        match router.generate(&request).await {
            Ok(response) => {
                print_fragment(&response);
                println!();
            }
            Err(e) => {
                eprintln!("request failed: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    let mut fragments = match router.generate_stream(&request).await {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("request failed: {e}");
            std::process::exit(1);
        }
    };
    while let Some(item) = fragments.next().await {
        match item {
            Ok(fragment) => print_fragment(&fragment),
            Err(e) => {
                eprintln!("\nstream failed: {e}");
                std::process::exit(1);
            }
        }
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_flags_and_prompt() {
        let args = CliArgs::try_parse_from([
            "protobridge",
            "--protocol",
            "responses",
            "--no-stream",
            "use",
            "the",
            "read_file",
            "tool",
        ])
        .unwrap();
        assert_eq!(args.config, "config.yaml");
        assert_eq!(
            args.protocol.map(WireProtocol::from),
            Some(WireProtocol::Responses)
        );
        assert!(args.no_stream);
        assert_eq!(args.prompt.join(" "), "use the read_file tool");
    }

    #[test]
    fn test_cli_rejects_unknown_protocol_and_empty_prompt() {
        assert!(CliArgs::try_parse_from(["protobridge", "--protocol", "grpc", "hi"]).is_err());
        assert!(CliArgs::try_parse_from(["protobridge", "--config", "c.yaml"]).is_err());
    }
}
