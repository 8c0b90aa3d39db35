//! REPL
//!
//! Line-edited interactive session over rustyline, with history persisted
//! under the user data directory. Multi-line input is buffered by brace
//! depth: the prompt switches to `... ` until the braces balance, then
//! the whole buffer is interpreted. The REPL runs with every capability
//! granted.

use std::path::PathBuf;

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use glipt_runtime::Vm;

fn history_path() -> Option<PathBuf> {
    let dir = dirs::data_dir()?.join("glipt");
    std::fs::create_dir_all(&dir).ok()?;
    Some(dir.join("history.txt"))
}

pub fn run_repl() {
    let mut vm = Vm::new();
    vm.permissions.allow_all = true;

    println!(
        "Glipt {} REPL (type 'exit' to quit)",
        env!("CARGO_PKG_VERSION")
    );

    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(err) => {
            eprintln!("Error: could not start line editor: {err}");
            return;
        }
    };
    let history = history_path();
    if let Some(path) = &history {
        let _ = editor.load_history(path);
    }

    let mut buffer = String::new();
    let mut brace_depth: i32 = 0;

    loop {
        let prompt = if brace_depth > 0 { "... " } else { ">>> " };
        let line = match editor.readline(prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                buffer.clear();
                brace_depth = 0;
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("Error: {err}");
                break;
            }
        };

        let trimmed = line.trim();
        if brace_depth == 0 && (trimmed == "exit" || trimmed == "quit") {
            break;
        }
        if !trimmed.is_empty() {
            let _ = editor.add_history_entry(&line);
        }

        for byte in line.bytes() {
            match byte {
                b'{' => brace_depth += 1,
                b'}' => brace_depth -= 1,
                _ => {}
            }
        }

        buffer.push_str(&line);
        buffer.push('\n');

        if brace_depth <= 0 {
            brace_depth = 0;
            if let Err(err) = vm.interpret(&buffer) {
                eprintln!("{err}");
            }
            buffer.clear();
        }
    }

    if let Some(path) = &history {
        let _ = editor.save_history(path);
    }
}
