//! Slash directives
//!
//! Control messages typed at the prompt. They are handled by the loop itself,
//! never reach the model and are not recorded as turns.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// `/model` with no argument: show the active backend and the models
    /// each provider can serve
    ShowModel,
    /// `/model <provider>[:<model>]` or `/model <model>`
    SwitchModel(String),
    /// `/clear [--force]`
    Clear { force: bool },
    /// `/help`
    Help,
}

pub const HELP: &str = "/model                      show the active backend and available models\n\
/model <provider>[:<model>]  switch backend (ollama, openai)\n\
/model <model>              switch model on the active backend\n\
/clear [--force]            clear conversation history\n\
/help                       this message";

/// `None` when `input` is not a directive; `Some(Err)` for an unknown or
/// malformed one.
pub fn parse(input: &str) -> Option<Result<Directive, String>> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;
    let mut words = rest.split_whitespace();
    let command = words.next().unwrap_or_default();
    let args: Vec<&str> = words.collect();

    Some(match command {
        "model" => match args.as_slice() {
            [] => Ok(Directive::ShowModel),
            [selection] => Ok(Directive::SwitchModel(selection.to_string())),
            _ => Err("usage: /model <provider>[:<model>] | /model <model>".to_string()),
        },
        "clear" => match args.as_slice() {
            [] => Ok(Directive::Clear { force: false }),
            ["--force"] | ["-f"] => Ok(Directive::Clear { force: true }),
            _ => Err("usage: /clear [--force]".to_string()),
        },
        "help" => Ok(Directive::Help),
        other => Err(format!("unknown command /{} (try /help)", other)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_not_a_directive() {
        assert_eq!(parse("fix the model loader"), None);
        assert_eq!(parse("  "), None);
    }

    #[test]
    fn test_model() {
        assert_eq!(parse("/model"), Some(Ok(Directive::ShowModel)));
        assert_eq!(
            parse("/model openai:gpt-4o"),
            Some(Ok(Directive::SwitchModel("openai:gpt-4o".into())))
        );
        assert!(matches!(parse("/model a b"), Some(Err(_))));
    }

    #[test]
    fn test_clear() {
        assert_eq!(parse("/clear"), Some(Ok(Directive::Clear { force: false })));
        assert_eq!(
            parse(" /clear --force "),
            Some(Ok(Directive::Clear { force: true }))
        );
        assert!(matches!(parse("/clear now"), Some(Err(_))));
    }

    #[test]
    fn test_unknown() {
        let err = parse("/deploy").unwrap().unwrap_err();
        assert!(err.contains("/deploy"));
    }
}
