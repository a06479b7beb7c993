//! CLI transport: interactive menu and one-shot commands

use crate::config::Config;
use crate::core::{
    lock, status_text, Catalog, DispatchError, Dispatcher, FileThemeStore, ImageUnit, Mode,
    Palette, Picker, PresentationController, Rgb, Session, SharedSession, ThemeStore,
};
use crate::llm::{AspectRatio, ProviderRegistry};
use anyhow::{Context, Result};
use colored::{ColoredString, Colorize};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tabled::{settings::Style, Table, Tabled};

const BACK_WORDS: [&str; 4] = ["exit", "quit", "q", "back"];

fn paint(text: &str, color: Rgb) -> ColoredString {
    text.truecolor(color.0, color.1, color.2)
}

/// Numbered menu over a session, reading commands line by line
pub struct ChatMenu<R, W, S: ThemeStore> {
    dispatcher: Dispatcher,
    session: SharedSession,
    ui: PresentationController<S>,
    input: R,
    out: W,
}

impl<R: BufRead, W: Write, S: ThemeStore> ChatMenu<R, W, S> {
    pub fn new(dispatcher: Dispatcher, catalog: Catalog, store: S, input: R, out: W) -> Self {
        let ui = PresentationController::new(store);
        let mut session = Session::new(Arc::new(catalog));
        ui.restore(&mut session);
        Self {
            dispatcher,
            session: session.shared(),
            ui,
            input,
            out,
        }
    }

    fn palette(&self) -> Palette {
        Palette::for_theme(lock(&self.session).theme())
    }

    /// Read one trimmed line; `None` at end of input
    fn prompt(&mut self, prompt: &str) -> Result<Option<String>> {
        write!(self.out, "{}", prompt)?;
        self.out.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    fn print_menu(&mut self) -> Result<()> {
        let palette = self.palette();
        let (chat, image) = {
            let s = lock(&self.session);
            let catalog = s.catalog();
            (
                catalog
                    .chat_models
                    .iter()
                    .map(|m| (m.name.clone(), m.supports_websearch))
                    .collect::<Vec<_>>(),
                catalog
                    .image_models
                    .iter()
                    .map(|m| format!("{} ({})", m.name, m.provider))
                    .collect::<Vec<_>>(),
            )
        };

        writeln!(self.out, "\n{}", "=".repeat(50))?;
        writeln!(self.out, "{}", paint("REDMOON", palette.accent).bold())?;
        writeln!(self.out, "{}", paint("Chat models:", palette.muted))?;
        for (i, (name, websearch)) in chat.iter().enumerate() {
            let note = if *websearch { " [web search]" } else { "" };
            writeln!(self.out, "  {}. {}{}", i + 1, name, note)?;
        }
        writeln!(self.out, "{}", paint("Image models:", palette.muted))?;
        for (i, name) in image.iter().enumerate() {
            writeln!(self.out, "  {}. {}", chat.len() + i + 1, name)?;
        }
        writeln!(self.out, "{}", paint("Other:", palette.muted))?;
        writeln!(self.out, "  t. Toggle theme")?;
        writeln!(self.out, "  0. Exit")?;
        writeln!(self.out, "{}", "=".repeat(50))?;
        Ok(())
    }

    /// Main loop; returns when the user exits or input ends
    pub async fn run(&mut self) -> Result<()> {
        loop {
            self.ui.open(Picker::SideMenu);
            self.print_menu()?;
            let Some(choice) = self.prompt("Enter your choice: ")? else {
                break;
            };
            self.ui.close_all();

            let (chat_count, image_count) = {
                let s = lock(&self.session);
                (s.catalog().chat_models.len(), s.catalog().image_models.len())
            };

            match choice.to_lowercase().as_str() {
                "0" => break,
                "t" | "theme" => {
                    let theme = {
                        let mut s = lock(&self.session);
                        self.ui.toggle_theme(&mut s)
                    };
                    writeln!(self.out, "Theme set to {}", theme)?;
                }
                other => match other.parse::<usize>() {
                    Ok(n) if (1..=chat_count).contains(&n) => self.chat_loop(n - 1).await?,
                    Ok(n) if n > chat_count && n <= chat_count + image_count => {
                        self.image_loop(n - chat_count - 1).await?
                    }
                    _ => writeln!(self.out, "{}", "Please enter a valid choice.".red())?,
                },
            }
        }
        writeln!(self.out, "Goodbye!")?;
        Ok(())
    }

    /// Select a model by catalog position and show its surface
    fn enter(&mut self, mode: Mode, index: usize) -> Result<String> {
        let mut s = lock(&self.session);
        let id = match mode {
            Mode::Chat => s.catalog().chat_models[index].id.clone(),
            Mode::Image => s.catalog().image_models[index].id.clone(),
        };
        s.select_model(mode, &id)?;
        self.ui.switch_mode(&mut s, mode);
        Ok(id)
    }

    async fn chat_loop(&mut self, index: usize) -> Result<()> {
        let model_id = self.enter(Mode::Chat, index)?;
        let palette = self.palette();
        let status = status_text(&lock(&self.session));
        writeln!(self.out, "{}", paint(&format!("Chatting with {}", status), palette.accent))?;
        writeln!(
            self.out,
            "{}",
            paint(
                "Type 'exit' to return to the menu, 'clear' to start over, 'web on' or 'web off' to toggle search.",
                palette.muted
            )
        )?;

        while let Some(line) = self.prompt("\n> ")? {
            if line.is_empty() {
                continue;
            }
            let lower = line.to_lowercase();
            if BACK_WORDS.contains(&lower.as_str()) {
                break;
            }
            if lower == "clear" {
                self.dispatcher.clear(&self.session, &model_id).await?;
                writeln!(self.out, "{}", paint("Conversation cleared.", palette.muted))?;
                continue;
            }
            if lower == "web on" || lower == "web off" {
                let result = lock(&self.session).set_websearch(lower == "web on");
                match result {
                    Ok(()) => writeln!(self.out, "Web search {}", &lower[4..])?,
                    Err(e) => writeln!(self.out, "{}", e.user_message().red())?,
                }
                continue;
            }

            writeln!(self.out, "{}", paint(&format!("{} is typing...", status), palette.muted))?;
            match self.dispatcher.send_chat(&self.session, &model_id, &line, None).await {
                Ok(reply) => {
                    writeln!(self.out, "{}", paint(&format!("{}:", status), palette.accent).bold())?;
                    writeln!(self.out, "{}", reply.text)?;
                }
                Err(e) => writeln!(self.out, "{}", format!("Error: {}", e.user_message()).red())?,
            }
        }
        Ok(())
    }

    async fn image_loop(&mut self, index: usize) -> Result<()> {
        let model_id = self.enter(Mode::Image, index)?;
        let palette = self.palette();
        let status = status_text(&lock(&self.session));
        let mut aspect_ratio = AspectRatio::default();
        let mut negative_prompt: Option<String> = None;

        writeln!(self.out, "{}", paint(&format!("Generating with {}", status), palette.accent))?;
        writeln!(
            self.out,
            "{}",
            paint(
                "Type a prompt, 'ratio 16:9' to change shape, 'neg <text>' for a negative prompt, 'exit' to go back.",
                palette.muted
            )
        )?;

        while let Some(line) = self.prompt("\nprompt> ")? {
            if line.is_empty() {
                continue;
            }
            let lower = line.to_lowercase();
            if BACK_WORDS.contains(&lower.as_str()) {
                break;
            }
            if let Some(ratio) = lower.strip_prefix("ratio ") {
                match ratio.parse::<AspectRatio>() {
                    Ok(r) => {
                        aspect_ratio = r;
                        writeln!(self.out, "Aspect ratio set to {}", r)?;
                    }
                    Err(e) => writeln!(self.out, "{}", e.red())?,
                }
                continue;
            }
            if let Some(neg) = line.strip_prefix("neg ") {
                negative_prompt = Some(neg.trim().to_string()).filter(|n| !n.is_empty());
                writeln!(self.out, "Negative prompt set")?;
                continue;
            }

            writeln!(self.out, "{}", paint("Generating image...", palette.muted))?;
            let result = self
                .dispatcher
                .generate_image(
                    &self.session,
                    &model_id,
                    &line,
                    negative_prompt.as_deref(),
                    aspect_ratio.as_str(),
                )
                .await;
            match result {
                Ok(unit) => self.show_image(unit)?,
                Err(e) => self.show_failure(&e)?,
            }
        }
        Ok(())
    }

    fn show_image(&mut self, unit: ImageUnit) -> Result<()> {
        match unit {
            ImageUnit::Url { url } => writeln!(self.out, "Image URL: {}", url)?,
            ImageUnit::Inline { content_type, data } => {
                let path = save_inline_image(&content_type, &data)?;
                writeln!(self.out, "Image saved to {}", path.display())?;
            }
        }
        Ok(())
    }

    fn show_failure(&mut self, err: &DispatchError) -> Result<()> {
        writeln!(self.out, "{}", format!("Error: {}", err.user_message()).red())?;
        Ok(())
    }
}

/// Write inline image bytes to the current directory
fn save_inline_image(content_type: &str, data: &[u8]) -> Result<PathBuf> {
    let ext = match content_type {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "png",
    };
    let id = uuid::Uuid::new_v4().simple().to_string();
    let path = PathBuf::from(format!("redmoon-{}.{}", &id[..8], ext));
    std::fs::write(&path, data).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

/// Run the interactive menu on stdin/stdout
pub async fn run_chat(config: &Config) -> Result<()> {
    let registry = ProviderRegistry::from_config(config)?;
    let store = FileThemeStore::in_config_dir()?;
    let stdin = io::stdin();
    let mut menu = ChatMenu::new(
        Dispatcher::new(registry),
        Catalog::from_config(config),
        store,
        stdin.lock(),
        io::stdout(),
    );
    menu.run().await
}

#[derive(Tabled)]
struct ModelRow {
    #[tabled(rename = "Kind")]
    kind: &'static str,
    #[tabled(rename = "Id")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Details")]
    details: String,
}

/// Print the model catalog
pub fn run_models(config: &Config, format: &str) -> Result<()> {
    let catalog = Catalog::from_config(config);

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&catalog)?),
        _ => {
            let rows = catalog
                .chat_models
                .iter()
                .map(|m| ModelRow {
                    kind: "chat",
                    id: m.id.clone(),
                    name: m.name.clone(),
                    details: if m.supports_websearch {
                        "web search".to_string()
                    } else {
                        String::new()
                    },
                })
                .chain(catalog.image_models.iter().map(|m| ModelRow {
                    kind: "image",
                    id: m.id.clone(),
                    name: m.name.clone(),
                    details: m.provider.clone(),
                }));

            let mut table = Table::new(rows);
            table.with(Style::rounded());
            println!("{}", table);
        }
    }
    Ok(())
}

/// Show the config file location, or write the defaults there
pub fn run_config(init: bool) -> Result<()> {
    let path = Config::config_path()?;

    if init {
        if path.exists() {
            println!(
                "{} {} already exists; not overwriting",
                "!".yellow(),
                path.display()
            );
        } else {
            let written = Config::default().save()?;
            println!("{} Wrote default config to {}", "✓".green(), written.display());
        }
        return Ok(());
    }

    println!("Config file: {}", path.display());
    if path.exists() {
        let config = Config::load_from(&path)?;
        println!("{}", toml::to_string_pretty(&config)?);
    } else {
        println!("{}", "(not created; using built-in defaults, run `redmoon config --init`)".dimmed());
    }
    Ok(())
}
