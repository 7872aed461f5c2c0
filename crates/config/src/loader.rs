use std::{fmt::Write, path::Path, sync::OnceLock};

use regex::Regex;
use serde::Deserialize;
use toml::Value;

use crate::{Config, error::Error};

pub fn load<P: AsRef<Path>>(path: P) -> crate::Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())?;
    parse(&content)
}

pub(crate) fn parse(content: &str) -> crate::Result<Config> {
    let mut raw_config: Value = toml::from_str(content)?;

    expand_dynamic_strings(&mut Vec::new(), &mut raw_config)?;

    let config = Config::deserialize(raw_config)?;
    validate(&config)?;

    if !config.llm.has_providers() {
        log::warn!("No LLM providers configured; every model lookup will fail");
    }

    Ok(config)
}

pub(crate) fn validate(config: &Config) -> crate::Result<()> {
    for (name, provider) in &config.llm.providers {
        if name.is_empty() || name.contains('/') {
            return Err(Error::Validation(format!(
                "provider name '{name}' must be non-empty and must not contain '/'"
            )));
        }

        if let Some(base_url) = provider.base_url()
            && let Err(err) = url::Url::parse(base_url)
        {
            return Err(Error::Validation(format!(
                "provider '{name}' has an invalid base_url '{base_url}': {err}"
            )));
        }
    }

    if config.agent.max_turns == 0 {
        return Err(Error::Validation("agent.max_turns must be at least 1".to_string()));
    }

    if config.image_fetch.max_bytes == 0 {
        return Err(Error::Validation("image_fetch.max_bytes must be greater than zero".to_string()));
    }

    Ok(())
}

fn expand_dynamic_strings<'a>(path: &mut Vec<Result<&'a str, usize>>, value: &'a mut Value) -> crate::Result<()> {
    match value {
        Value::String(s) => match expand_env_placeholders(s) {
            Ok(out) => *s = out,
            Err(reason) => {
                let mut p = String::new();

                for segment in path.iter() {
                    match segment {
                        Ok(s) => {
                            p.push_str(s);
                            p.push('.');
                        }
                        Err(i) => {
                            let _ = write!(p, "[{i}]");
                        }
                    }
                }

                if p.ends_with('.') {
                    p.pop();
                }

                return Err(Error::EnvVarSubstitution { path: p, reason });
            }
        },
        Value::Array(values) => {
            for (i, value) in values.iter_mut().enumerate() {
                path.push(Err(i));
                expand_dynamic_strings(path, value)?;
                path.pop();
            }
        }
        Value::Table(map) => {
            for (key, value) in map {
                path.push(Ok(key.as_str()));
                expand_dynamic_strings(path, value)?;
                path.pop();
            }
        }
        Value::Integer(_) | Value::Float(_) | Value::Boolean(_) | Value::Datetime(_) => (),
    }

    Ok(())
}

/// Matches `{{ namespace.NAME }}`. Other uses of braces are left alone.
fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();

    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\.([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("placeholder regex is valid")
    })
}

/// Replaces every `{{ env.NAME }}` placeholder with the value of `NAME`.
fn expand_env_placeholders(input: &str) -> Result<String, String> {
    let mut output = String::with_capacity(input.len());
    let mut last = 0;

    for captures in placeholder_regex().captures_iter(input) {
        let (Some(whole), Some(namespace), Some(variable)) = (captures.get(0), captures.get(1), captures.get(2)) else {
            continue;
        };

        if namespace.as_str() != "env" {
            return Err(format!(
                "unsupported placeholder '{}.{}', expected 'env.NAME'",
                namespace.as_str(),
                variable.as_str()
            ));
        }

        let value = std::env::var(variable.as_str())
            .map_err(|_| format!("environment variable not found: `{}`", variable.as_str()))?;

        output.push_str(&input[last..whole.start()]);
        output.push_str(&value);
        last = whole.end();
    }

    output.push_str(&input[last..]);

    Ok(output)
}
