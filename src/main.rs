use std::fs::File;
use std::path::PathBuf;

use aisource::Provider;
use aisource::core::attachment::{load_file, mime_for_path};
use aisource::core::config::{self, CliOverrides};
use aisource::core::sources::build_client;
use aisource::inference::{
    ChatMessage, ChatRequest, MediaPayload, MediaRequest, SendOptions, StreamSink,
};
use clap::Parser;
use simplelog::{ConfigBuilder, LevelFilter, WriteLogger};
use std::io::Write;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "aisource", about = "Stream answers from Gemini, OpenAI or OpenRouter")]
struct Args {
    /// AI source to use (overrides config and AISOURCE_PROVIDER)
    #[arg(short, long, value_enum)]
    provider: Option<Provider>,

    /// Model identifier (defaults to the provider's default model)
    #[arg(short, long)]
    model: Option<String>,

    /// Ask the provider to ground the answer with web search
    #[arg(short, long)]
    online_search: bool,

    /// List the models the provider offers and exit
    #[arg(long)]
    list_models: bool,

    /// Attach a local file
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Attach a remote file by URL
    #[arg(long, conflicts_with = "file")]
    url: Option<String>,

    /// MIME type of the attachment (guessed from the extension if omitted)
    #[arg(long)]
    mime: Option<String>,

    /// Extra system prompt, may be repeated
    #[arg(short, long)]
    system: Vec<String>,

    /// The prompt
    prompt: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    dotenv::dotenv().ok();

    let log_config = ConfigBuilder::new().set_time_format_rfc3339().build();
    if let Ok(log_file) = File::create("aisource.log") {
        let _ = WriteLogger::init(LevelFilter::Debug, log_config, log_file);
    }

    let app_config = config::load_config()?;
    let resolved = config::resolve(
        &app_config,
        &CliOverrides {
            provider: args.provider,
            model: args.model.clone(),
            online_search: args.online_search,
        },
    );
    log::info!(
        "aisource starting up with provider: {:?}, model: {}",
        resolved.provider,
        resolved.model_name
    );

    let mut client = build_client(&resolved)?;
    for prompt in args.system {
        client.add_system_prompt(prompt);
    }

    if args.list_models {
        for model in client.available_models().await? {
            println!("{}\t{}", model.id, model.display_name);
        }
        return Ok(());
    }

    let prompt = args.prompt.join(" ");
    let options = SendOptions {
        online_search: resolved.online_search,
    };

    let (tx, mut rx) = mpsc::channel::<String>(64);
    let cancel = CancellationToken::new();
    let sink = StreamSink::channel(tx).with_cancellation(cancel.clone());

    let printer = tokio::spawn(async move {
        let mut stdout = std::io::stdout();
        while let Some(chunk) = rx.recv().await {
            let _ = write!(stdout, "{chunk}");
            let _ = stdout.flush();
        }
        let _ = writeln!(stdout);
    });

    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let attachment = match (&args.file, &args.url) {
        (Some(path), _) => Some((
            load_file(path)?,
            args.mime
                .clone()
                .unwrap_or_else(|| mime_for_path(path).to_string()),
        )),
        (None, Some(url)) => Some((
            MediaPayload::parse(url),
            args.mime
                .clone()
                .unwrap_or_else(|| mime_for_path(&PathBuf::from(url)).to_string()),
        )),
        (None, None) => None,
    };

    let model = Some(resolved.model_name.as_str());
    let result = match &attachment {
        Some((media, mime_type)) => {
            let mut request = MediaRequest::new(media, mime_type);
            request.prompt = (!prompt.trim().is_empty()).then_some(prompt.as_str());
            request.model = model;
            request.options = options;
            client.send_media(request, sink).await
        }
        None => {
            let messages = [ChatMessage::user(prompt)];
            let mut request = ChatRequest::new(&messages);
            request.model = model;
            request.options = options;
            client.send_chat(request, sink).await
        }
    };

    let _ = printer.await;
    match result {
        Ok(text) => {
            log::info!("Response complete: {} chars", text.len());
            Ok(())
        }
        Err(e) => {
            log::error!("Request failed: {e}");
            Err(e.into())
        }
    }
}
