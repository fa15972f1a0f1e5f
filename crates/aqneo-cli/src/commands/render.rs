//! `aqneo render`: expand a template locally.

use anyhow::{bail, Context, Result};
use clap::Args;
use serde_json::Value;

use aqneo_core::{render, FormatValue, QueryRegistry, TemplateArgs};

#[derive(Args)]
pub struct RenderArgs {
    /// Template text, e.g. "MATCH (n:{type}) WHERE n.id = {id}"
    #[arg(required_unless_present = "query")]
    pub template: Option<String>,

    /// Render a registered query declaration instead
    #[arg(long, short, conflicts_with = "template")]
    pub query: Option<String>,

    /// Template argument as key=value; JSON values are parsed, anything
    /// else is text
    #[arg(long = "set", short = 's', value_name = "KEY=VALUE")]
    pub args: Vec<String>,
}

pub fn execute(args: RenderArgs) -> Result<()> {
    let template = match (&args.template, &args.query) {
        (Some(template), _) => template.clone(),
        (None, Some(name)) => QueryRegistry::with_builtins()?
            .get(name)
            .with_context(|| format!("Unknown query '{name}'"))?
            .to_string(),
        (None, None) => bail!("Give a template or --query"),
    };

    let mut template_args = TemplateArgs::new();
    for assignment in &args.args {
        let (key, value) = parse_assignment(assignment)?;
        template_args.insert(key, value);
    }

    println!("{}", render(&template, &template_args)?);
    Ok(())
}

fn parse_assignment(assignment: &str) -> Result<(String, FormatValue)> {
    let Some((key, raw)) = assignment.split_once('=') else {
        bail!("Invalid argument '{assignment}': expected KEY=VALUE");
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("Invalid argument '{assignment}': empty key");
    }
    let value = match serde_json::from_str::<Value>(raw) {
        Ok(value) => FormatValue::from_json(&value),
        Err(_) => FormatValue::Text(raw.to_string()),
    };
    Ok((key.to_string(), value))
}
