// Interactive REPL around the orchestrator

use anyhow::Result;
use std::io::{self, BufRead, IsTerminal, Write};

use super::commands::{handle_command, Command};
use super::input::InputHandler;
use crate::orchestrator::Orchestrator;

pub struct Repl {
    orchestrator: Orchestrator,
    input_handler: Option<InputHandler>,
}

impl Repl {
    pub fn new(orchestrator: Orchestrator) -> Self {
        // Plain stdin when piped
        let input_handler = if io::stdin().is_terminal() {
            match InputHandler::new() {
                Ok(handler) => Some(handler),
                Err(e) => {
                    eprintln!("Failed to initialize input handler: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Self {
            orchestrator,
            input_handler,
        }
    }

    /// Run until /exit or end of input; pending changes are discarded on exit
    pub async fn run(mut self) -> Result<()> {
        println!("{}", self.orchestrator.greeting());

        loop {
            let prompt = if self.orchestrator.pending().is_some() {
                "confirm> "
            } else {
                "> "
            };
            let Some(line) = self.read_line(prompt)? else {
                break;
            };
            if line.is_empty() {
                continue;
            }

            if let Some(command) = Command::parse(&line) {
                if command == Command::Quit {
                    break;
                }
                println!("{}\n", handle_command(&command, &mut self.orchestrator).await);
                continue;
            }

            let response = self.orchestrator.handle(&line).await;
            println!("{}\n", response.text);
        }

        let farewell = self.orchestrator.end_session();
        println!("{}", farewell.text);
        if let Some(handler) = self.input_handler.as_mut() {
            if let Err(e) = handler.save_history() {
                tracing::warn!("Failed to save history: {}", e);
            }
        }
        Ok(())
    }

    fn read_line(&mut self, prompt: &str) -> Result<Option<String>> {
        match self.input_handler.as_mut() {
            Some(handler) => handler.read_line(prompt),
            None => {
                print!("{}", prompt);
                io::stdout().flush()?;
                let mut line = String::new();
                if io::stdin().lock().read_line(&mut line)? == 0 {
                    return Ok(None);
                }
                Ok(Some(line.trim().to_string()))
            }
        }
    }
}
