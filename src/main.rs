use std::path::PathBuf;

use blog_tui::api::Id;
use blog_tui::app::RunOptions;

const HELP: &str = "Blog-TUI - Browse a blog's posts and comments from the terminal.

Usage: blog-tui [OPTIONS]

  --config PATH        Read configuration from PATH
  --post ID            Open the post with this id
  --demo               Browse built-in sample posts without a server
  --version, -V        Show version and exit
  --help,    -h        Show this help message";

enum Command {
    Run(RunOptions),
    Exit,
}

fn main() {
    let command = match parse_args(std::env::args().skip(1)) {
        Ok(command) => command,
        Err(message) => {
            eprintln!("error: {message}\n\n{HELP}");
            std::process::exit(2);
        }
    };

    let Command::Run(options) = command else {
        return;
    };
    if let Err(err) = blog_tui::run(options) {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Command, String> {
    let mut options = RunOptions::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("Blog-TUI {}", blog_tui::VERSION);
                return Ok(Command::Exit);
            }
            "--help" | "-h" => {
                println!("{HELP}");
                return Ok(Command::Exit);
            }
            "--config" => {
                let path = args.next().ok_or("--config needs a path")?;
                options.config_path = Some(PathBuf::from(path));
            }
            "--post" => {
                let id = args.next().ok_or("--post needs an id")?;
                if id.trim().is_empty() {
                    return Err("--post needs an id".into());
                }
                options.post_id = Some(Id::new(id.trim()));
            }
            "--demo" => options.demo = true,
            other => return Err(format!("unknown argument {other:?}")),
        }
    }
    Ok(Command::Run(options))
}
