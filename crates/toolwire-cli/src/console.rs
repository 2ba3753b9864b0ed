//! Menu loop over a ready session.

use std::collections::BTreeMap;
use std::io::Write;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines, Stdin};
use toolwire::{ContentBlock, Session, ToolDescriptor, ToolwireError};
use tracing::debug;

/// Whether the loop should keep going after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Continue,
    Quit,
}

/// Line-oriented operator console.
pub struct Console<R> {
    input: Lines<BufReader<R>>,
}

impl Console<Stdin> {
    pub fn stdin() -> Self {
        Self::new(tokio::io::stdin())
    }
}

impl<R: AsyncRead + Unpin> Console<R> {
    pub fn new(input: R) -> Self {
        Self {
            input: BufReader::new(input).lines(),
        }
    }

    /// Run the menu until the operator quits, stdin ends, or a fatal error.
    pub async fn run(&mut self, session: &Session) -> anyhow::Result<()> {
        loop {
            println!();
            println!("1) Run a tool");
            println!("2) Read a resource");
            println!("3) Quit");

            let Some(choice) = self.prompt("Select an option: ").await? else {
                return Ok(());
            };

            let step = match choice.trim() {
                "1" => self.run_tool(session).await,
                "2" => self.read_resource(session).await,
                "3" | "q" | "quit" => return Ok(()),
                "" => continue,
                other => {
                    println!("Unknown option: {}", other);
                    continue;
                }
            };

            match step {
                Ok(Step::Continue) => {}
                Ok(Step::Quit) => return Ok(()),
                Err(e) => {
                    println!("{}", describe_error(&e));
                    if e.is_fatal() {
                        return Err(e.into());
                    }
                }
            }
        }
    }

    async fn run_tool(&mut self, session: &Session) -> toolwire::Result<Step> {
        let tools = session.tools();
        if tools.is_empty() {
            println!("The peer offers no tools.");
            return Ok(Step::Continue);
        }

        println!();
        for (index, tool) in tools.iter().enumerate() {
            if tool.description.is_empty() {
                println!("{}) {}", index + 1, tool.name);
            } else {
                println!("{}) {} - {}", index + 1, tool.name, tool.description);
            }
        }

        let Some(tool) = self.select(tools, "Select a tool: ").await? else {
            return Ok(Step::Quit);
        };
        let Some(arguments) = self.solicit_arguments(tool).await? else {
            return Ok(Step::Quit);
        };

        let output = session.call_tool(tool, arguments).await?;
        if output.is_error {
            println!("{} reported an error:", tool.name);
        }
        print_blocks(&output.content);
        Ok(Step::Continue)
    }

    async fn read_resource(&mut self, session: &Session) -> toolwire::Result<Step> {
        let resources = session.resources();
        if resources.is_empty() {
            println!("The peer offers no resources.");
            return Ok(Step::Continue);
        }

        println!();
        for (index, resource) in resources.iter().enumerate() {
            println!("{}) {} ({})", index + 1, resource.name, resource.uri);
        }

        let Some(resource) = self.select(resources, "Select a resource: ").await? else {
            return Ok(Step::Quit);
        };

        let contents = session.read_resource(resource).await?;
        print_blocks(&contents);
        Ok(Step::Continue)
    }

    /// Ask for each string parameter of `tool`. Blank optional values are omitted.
    async fn solicit_arguments(
        &mut self,
        tool: &ToolDescriptor,
    ) -> toolwire::Result<Option<BTreeMap<String, String>>> {
        let mut arguments = BTreeMap::new();
        for name in tool.input_schema.string_parameters() {
            let required = tool.input_schema.is_required(name);
            let label = if required {
                format!("  {} (required): ", name)
            } else {
                format!("  {}: ", name)
            };

            let Some(value) = self.prompt(&label).await? else {
                return Ok(None);
            };
            if value.is_empty() && !required {
                continue;
            }
            arguments.insert(name.to_string(), value);
        }
        debug!("Collected {} argument(s) for {}", arguments.len(), tool.name);
        Ok(Some(arguments))
    }

    /// Pick one entry by its 1-based number. `None` means stdin ended.
    async fn select<'a, T>(&mut self, items: &'a [T], label: &str) -> toolwire::Result<Option<&'a T>> {
        loop {
            let Some(answer) = self.prompt(label).await? else {
                return Ok(None);
            };
            match answer.trim().parse::<usize>() {
                Ok(n) if (1..=items.len()).contains(&n) => return Ok(Some(&items[n - 1])),
                _ => println!("Enter a number between 1 and {}.", items.len()),
            }
        }
    }

    /// Print `label` and read one line. `None` means stdin ended.
    async fn prompt(&mut self, label: &str) -> toolwire::Result<Option<String>> {
        print!("{}", label);
        std::io::stdout().flush()?;
        Ok(self.input.next_line().await?)
    }
}

fn print_blocks(blocks: &[ContentBlock]) {
    if blocks.is_empty() {
        println!("(no content)");
    }
    for block in blocks {
        println!("{}", block.display());
    }
}

fn describe_error(err: &ToolwireError) -> String {
    match err {
        ToolwireError::Remote { code, message, .. } => {
            format!("The peer rejected the request ({}): {}", code, message)
        }
        ToolwireError::Timeout { method, after } => {
            format!("The peer did not answer {} within {:?}", method, after)
        }
        ToolwireError::PeerDisconnected { reason } => {
            format!("The peer is gone: {}", reason)
        }
        ToolwireError::MalformedMessage { message } => {
            format!("The peer sent an unreadable answer: {}", message)
        }
        other => format!("Error [{}]: {}", other.kind(), other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn console(input: &str) -> Console<std::io::Cursor<Vec<u8>>> {
        Console::new(std::io::Cursor::new(input.as_bytes().to_vec()))
    }

    #[tokio::test]
    async fn test_select_retries_until_valid_number() {
        let mut console = console("zero\n7\n2\n");
        let items = ["a", "b", "c"];

        let picked = console.select(&items, "> ").await.unwrap();
        assert_eq!(picked, Some(&"b"));
    }

    #[tokio::test]
    async fn test_select_returns_none_on_end_of_input() {
        let mut console = console("9\n");
        let items = ["a"];

        assert_eq!(console.select(&items, "> ").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_solicit_arguments_skips_blank_optional_values() {
        let tool: ToolDescriptor = serde_json::from_value(json!({
            "name": "get-forecast",
            "inputSchema": {
                "properties": {
                    "city": {"type": "string"},
                    "days": {"type": "number"},
                    "units": {"type": "string"}
                },
                "required": ["city"]
            }
        }))
        .unwrap();
        let mut console = console("Oslo\n\n");

        let arguments = console.solicit_arguments(&tool).await.unwrap().unwrap();
        assert_eq!(arguments.len(), 1);
        assert_eq!(arguments.get("city").map(String::as_str), Some("Oslo"));
    }

    #[test]
    fn test_describe_error_is_kind_specific() {
        let timeout = ToolwireError::Timeout {
            method: "tools/call".to_string(),
            after: Duration::from_secs(5),
        };
        assert!(describe_error(&timeout).contains("tools/call"));

        let config = ToolwireError::Config {
            message: "empty program".to_string(),
        };
        assert_eq!(describe_error(&config), "Error [config]: Configuration error: empty program");
    }
}
