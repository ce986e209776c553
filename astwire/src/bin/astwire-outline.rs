//! Reference persistent-stream generator.
//!
//! Loads every document it is sent and answers with a plain-text outline
//! of the formats, fields and functions it declares. Documents that fail to
//! load are answered with an error frame carrying the load error.

use std::path::Path;
use std::sync::Arc;

use astwire::ast::node::{Format, Ident};
use astwire::ast::{Ast, Node, NodeRef};
use astwire::protocol::{
    init_telemetry, serve, Generate, GenerateRequest, Responder, ServeConfig, TelemetryConfig,
};
use async_trait::async_trait;
use clap::Parser;
use tracing::debug;

const SPEC: &str = r#"{"langs":["outline"],"input":"stdin_stream","suffix":[".outline.txt"]}"#;

#[derive(Parser)]
#[command(name = "astwire-outline")]
#[command(about = "Outline generator speaking the astwire stream protocol on stdin/stdout", long_about = None)]
#[command(version)]
struct Cli {
    /// Print the generator spec and exit
    #[arg(short = 's', long = "spec")]
    spec: bool,

    /// Emit logs as JSON on stderr
    #[arg(long, env = "ASTWIRE_JSON_LOGS")]
    json_logs: bool,
}

struct Outline;

#[async_trait]
impl Generate for Outline {
    async fn generate(&self, request: GenerateRequest, out: &Responder) -> anyhow::Result<()> {
        let ast = astwire::ast::from_slice(&request.payload)?;
        let name = request.name_lossy();
        let stem = Path::new(name.as_ref())
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| name.to_string());

        debug!(stream_id = request.stream_id, nodes = ast.nodes().len(), "Outlining");
        out.source(format!("{}.outline.txt", stem), outline(&ast))
            .await?;
        Ok(())
    }
}

fn outline(ast: &Ast) -> String {
    let mut text = String::new();
    for (_, node) in ast.iter() {
        let line = match node {
            Node::Format(format) => {
                let keyword = if format.is_enum { "enum" } else { "format" };
                format!("{} {}", keyword, name_of(ast, format.ident))
            }
            Node::Field(field) => {
                let name = field.ident.map_or("_", |ident| name_of(ast, ident));
                format!("field {}", qualified(ast, field.belong, name))
            }
            Node::Function(function) => {
                let name = name_of(ast, function.ident);
                format!("fn {}", qualified(ast, function.belong, name))
            }
            _ => continue,
        };
        text.push_str(&line);
        text.push('\n');
    }
    text
}

fn name_of(ast: &Ast, ident: NodeRef<Ident>) -> &str {
    ast.get(ident).map_or("?", |ident| ident.ident.as_str())
}

fn qualified(ast: &Ast, belong: Option<NodeRef<Format>>, name: &str) -> String {
    match belong.and_then(|format| ast.get(format)) {
        Some(format) => format!("{}.{}", name_of(ast, format.ident), name),
        None => name.to_string(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if cli.spec {
        println!("{}", SPEC);
        return Ok(());
    }

    init_telemetry(TelemetryConfig::new("astwire-outline").with_json_logs(cli.json_logs))?;

    serve(
        tokio::io::stdin(),
        tokio::io::stdout(),
        Arc::new(Outline),
        ServeConfig::default(),
    )
    .await?;
    Ok(())
}
