use serde::Serialize;
use tera::{Context, Error as TeraError, Tera};

use crate::models::tool::ToolCall;

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");
const FORMATTER_TEMPLATE: &str = include_str!("prompts/formatter.md");

pub fn load_prompt<T: Serialize>(template: &str, context_data: &T) -> Result<String, TeraError> {
    let mut tera = Tera::default();
    tera.add_raw_template("inline_template", template)?;
    let context = Context::from_serialize(context_data)?;
    let rendered = tera.render("inline_template", &context)?;
    Ok(rendered)
}

#[derive(Serialize)]
struct PreviousCall<'a> {
    name: &'a str,
    arguments: String,
}

#[derive(Serialize)]
struct SystemContext<'a> {
    base: &'a str,
    previous_calls: Vec<PreviousCall<'a>>,
    marker: &'a str,
}

/// The caller's system prompt followed by the calls already made in this session
pub fn system_prompt(
    base: &str,
    previous_calls: &[ToolCall],
    marker: &str,
) -> Result<String, TeraError> {
    let context = SystemContext {
        base,
        previous_calls: previous_calls
            .iter()
            .map(|call| PreviousCall {
                name: &call.name,
                arguments: call.arguments.to_string(),
            })
            .collect(),
        marker,
    };
    load_prompt(SYSTEM_TEMPLATE, &context)
}

#[derive(Serialize)]
struct FormatterContext<'a> {
    tool_name: &'a str,
    reasoning: Option<&'a str>,
}

/// Instruction for the final query that must call the formatter tool
pub fn formatter_prompt(tool_name: &str, reasoning: Option<&str>) -> Result<String, TeraError> {
    load_prompt(
        FORMATTER_TEMPLATE,
        &FormatterContext {
            tool_name,
            reasoning: reasoning.filter(|text| !text.trim().is_empty()),
        },
    )
}
