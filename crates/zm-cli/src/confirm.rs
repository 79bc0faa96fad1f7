use std::io::{self, BufRead, Write};

use zm_move::Confirmer;

/// Prompts on the terminal and reads the answer from stdin.
pub struct TerminalConfirmer;

impl Confirmer for TerminalConfirmer {
    fn present(&self, text: &str) {
        println!("{text}");
    }

    fn confirm(&self, prompt: &str) -> bool {
        let stdin = io::stdin();
        loop {
            print!("{prompt}? [y/n] ");
            let _ = io::stdout().flush();

            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                // EOF or a broken stdin never counts as consent.
                Ok(0) | Err(_) => return false,
                Ok(_) => {}
            }
            if let Some(answer) = parse_answer(&line) {
                return answer;
            }
        }
    }
}

fn parse_answer(line: &str) -> Option<bool> {
    match line.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}
