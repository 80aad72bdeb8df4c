use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use clap::Parser;

use comic_strip_studio::bubble::{BubbleStyle, ResizeHandle, TailAnchor};
use comic_strip_studio::compose::StripLayout;
use comic_strip_studio::data::load_image;
use comic_strip_studio::frame::FrameStyle;
use comic_strip_studio::panel::{BubbleEdit, PanelController};
use comic_strip_studio::raster::RenderContext;
use comic_strip_studio::script::{ContinuationType, Speaker, StoryFormat};
use comic_strip_studio::settings::Settings;
use comic_strip_studio::{ComicGenerator, Config, Gemini, Studio};

#[derive(Parser, Debug)]
#[command(
    name = "comic-strip-studio",
    version,
    about = "Generate, letter and compose 4-panel comic strips with Gemini"
)]
struct Cli {
    /// Comic topic; generates a full strip when given
    #[arg(short = 't', long = "topic")]
    topic: Option<String>,

    /// Story category (default: first entry of settings [story].categories)
    #[arg(short = 'c', long = "category")]
    category: Option<String>,

    /// Art style (default: first entry of settings [story].art_styles)
    #[arg(short = 'a', long = "art-style")]
    art_style: Option<String>,

    /// Dialogue presentation: speech-bubble, simple, webtoon, narration, cinematic
    #[arg(short = 'f', long = "frame-style")]
    frame_style: Option<String>,

    /// Story format: single or serial
    #[arg(long = "format")]
    format: Option<String>,

    /// Strip layout: grid, horizontal or vertical
    #[arg(short = 'l', long = "layout")]
    layout: Option<String>,

    /// Directory for generated files
    #[arg(short = 'o', long = "output-dir")]
    output_dir: Option<PathBuf>,

    /// Stack these images vertically into merged-comic.png and exit
    #[arg(long = "merge", num_args = 1..)]
    merge: Vec<PathBuf>,

    /// Print topic ideas for --category and exit
    #[arg(long = "ideas")]
    ideas: bool,

    /// Run the HTTP API on this address (e.g. 127.0.0.1:8787)
    #[arg(long = "server")]
    server: Option<String>,

    /// Text model name
    #[arg(short = 'm', long = "model")]
    model: Option<String>,

    /// Image model name
    #[arg(long = "image-model")]
    image_model: Option<String>,

    /// API key (overrides environment variables)
    #[arg(short = 'k', long = "key")]
    key: Option<String>,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings")]
    read_settings: Option<String>,

    /// Enable verbose logging
    #[arg(long = "verbose")]
    verbose: bool,

    /// Interactive mode
    #[arg(short = 'i', long = "interactive")]
    interactive: bool,
}

impl Cli {
    fn config(&self) -> Config {
        Config {
            topic: self.topic.clone(),
            category: self.category.clone(),
            art_style: self.art_style.clone(),
            frame_style: self.frame_style.clone(),
            format: self.format.clone(),
            layout: self.layout.clone(),
            output_dir: self.output_dir.clone(),
            model: self.model.clone(),
            image_model: self.image_model.clone(),
            key: self.key.clone(),
            settings_path: self.read_settings.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    comic_strip_studio::logging::init(cli.verbose)?;
    let config = cli.config();

    if cli.interactive {
        return run_interactive(config).await;
    }
    if let Some(addr) = cli.server.clone() {
        let settings = comic_strip_studio::load_settings(&config)?;
        return comic_strip_studio::server::run_server(settings, addr, config.key.clone()).await;
    }
    if !cli.merge.is_empty() {
        let settings = comic_strip_studio::load_settings(&config)?;
        let path = comic_strip_studio::merge_files(
            &cli.merge,
            settings.strip_options(),
            &config.output_dir(),
        )?;
        println!("{}", path.display());
        return Ok(());
    }
    if cli.ideas {
        let settings = comic_strip_studio::load_settings(&config)?;
        let category = config
            .category
            .clone()
            .unwrap_or_else(|| settings.default_category().to_string());
        let generator = comic_strip_studio::open_generator(&settings, config.key.as_deref())?;
        for idea in generator.generate_ideas(&category).await? {
            println!("{}", idea);
        }
        return Ok(());
    }
    if config.topic.is_none() {
        return Err(anyhow!(
            "nothing to do: pass --topic, --ideas, --merge, --server or --interactive"
        ));
    }

    let output = comic_strip_studio::run(config).await?;
    for file in output.files {
        println!("{}", file.display());
    }
    Ok(())
}

struct InteractiveState {
    config: Config,
    settings: Settings,
    ctx: RenderContext,
    studio: Studio,
    generator: Option<ComicGenerator<Gemini>>,
}

impl InteractiveState {
    fn new(config: Config) -> Result<Self> {
        let settings = comic_strip_studio::load_settings(&config)?;
        let ctx = RenderContext::from_settings(&settings)?;
        let mut studio = Studio::new(&settings);
        if let Some(topic) = config.topic.as_deref() {
            studio = studio.with_topic(topic)?;
        }
        if let Some(category) = config.category.as_deref() {
            studio = studio.with_category(category);
        }
        if let Some(style) = config.art_style.as_deref() {
            studio = studio.with_art_style(style)?;
        }
        if let Some(format) = config.format.as_deref() {
            studio = studio.with_format(StoryFormat::parse(format)?);
        }
        Ok(Self {
            config,
            settings,
            ctx,
            studio,
            generator: None,
        })
    }

    fn generator(&mut self) -> Result<&ComicGenerator<Gemini>> {
        if self.generator.is_none() {
            self.generator = Some(comic_strip_studio::open_generator(
                &self.settings,
                self.config.key.as_deref(),
            )?);
        }
        self.generator
            .as_ref()
            .ok_or_else(|| anyhow!("generator unavailable"))
    }
}

async fn run_interactive(config: Config) -> Result<()> {
    let mut state = InteractiveState::new(config)?;
    println!("Interactive mode. Use /quit or /exit to finish.");
    println!("Type /help to see available commands.");

    let mut line = String::new();
    let stdin = io::stdin();
    let mut stdin_lock = stdin.lock();
    loop {
        line.clear();
        print!("> ");
        io::stdout().flush()?;
        if stdin_lock.read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if !input.starts_with('/') {
            state.studio = state.studio.with_topic(input)?;
            println!("topic set to {}", state.studio.topic());
            continue;
        }
        match handle_interactive_command(input, &mut state).await {
            Ok(true) => break,
            Ok(false) => {}
            Err(err) => eprintln!("error: {:#}", err),
        }
    }
    Ok(())
}

async fn handle_interactive_command(input: &str, state: &mut InteractiveState) -> Result<bool> {
    let (command, rest) = match input.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (input, ""),
    };
    match command {
        "/quit" | "/exit" => return Ok(true),
        "/help" => print_interactive_help(),
        "/topic" => {
            if !rest.is_empty() {
                state.studio = state.studio.with_topic(rest)?;
            }
            println!("topic: {}", state.studio.topic());
        }
        "/category" => {
            if !rest.is_empty() {
                state.studio = state.studio.with_category(rest);
            }
            println!("category: {}", state.studio.category());
        }
        "/art-style" => {
            if !rest.is_empty() {
                state.studio = state.studio.with_art_style(rest)?;
            }
            println!("art-style: {}", state.studio.art_style());
        }
        "/format" => {
            if !rest.is_empty() {
                state.studio = state.studio.with_format(StoryFormat::parse(rest)?);
            }
            println!("format: {}", state.studio.format().as_str());
        }
        "/layout" => {
            if !rest.is_empty() {
                state.settings.layout = StripLayout::parse(rest)?;
            }
            println!("layout: {}", state.settings.layout.as_str());
        }
        "/ideas" => {
            let category = if rest.is_empty() {
                state.studio.category().to_string()
            } else {
                rest.to_string()
            };
            let ideas = state.generator()?.generate_ideas(&category).await?;
            for (idx, idea) in ideas.iter().enumerate() {
                println!("{}. {}", idx + 1, idea);
            }
        }
        "/script" => {
            if !rest.is_empty() {
                state.studio = state.studio.with_topic(rest)?;
            }
            let (topic, category, format) = (
                state.studio.topic().to_string(),
                state.studio.category().to_string(),
                state.studio.format(),
            );
            let script = state
                .generator()?
                .generate_script(&topic, &category, format)
                .await?;
            state.studio = state.studio.with_script(script)?;
            print_studio(&state.studio);
        }
        "/show" => print_studio(&state.studio),
        "/rename" => {
            let (index, name) = split_index(rest)?;
            state.studio = state.studio.rename_character(index, name, &state.ctx)?;
            print_studio(&state.studio);
        }
        "/speaker" => {
            let (index, speaker) = split_index(rest)?;
            state.studio = state
                .studio
                .set_panel_speaker(index, Speaker::parse(speaker), &state.ctx)?;
            print_studio(&state.studio);
        }
        "/dialogue" => {
            let (index, dialogue) = split_index(rest)?;
            state.studio = state.studio.set_dialogue(index, dialogue, &state.ctx)?;
            print_studio(&state.studio);
        }
        "/frame" => {
            if !rest.is_empty() {
                let style = FrameStyle::parse(rest)?;
                state.studio = state.studio.set_frame_style(style, &state.ctx)?;
            }
            println!("frame: {}", state.studio.frame_style().as_str());
        }
        "/portrait" => {
            let (index, path) = split_index_optional(rest)?;
            let bytes = match path {
                Some(path) => load_image(Path::new(path))?.bytes,
                None => {
                    let character = state
                        .studio
                        .script()
                        .and_then(|script| script.characters.get(index))
                        .map(|character| format!("{}: {}", character.name, character.description))
                        .ok_or_else(|| anyhow!("no character #{}", index + 1))?;
                    let art_style = state.studio.art_style().to_string();
                    state
                        .generator()?
                        .generate_character_sheet(&character, &art_style)
                        .await?
                }
            };
            state.studio = state.studio.set_character_portrait(index, &bytes)?;
            println!("portrait {} updated", index + 1);
        }
        "/images" => {
            let generator = state.generator()?.clone();
            let studio = state.studio.clone();
            state.studio = comic_strip_studio::illustrate(&generator, studio, &state.ctx).await?;
            print_studio(&state.studio);
        }
        "/image" => {
            let (index, path) = split_index(rest)?;
            let bytes = load_image(Path::new(path))?.bytes;
            state.studio = state.studio.with_panel_image(index, bytes, &state.ctx)?;
            print_studio(&state.studio);
        }
        "/regen" => {
            let (index, _) = split_index_optional(rest)?;
            let generator = state.generator()?.clone();
            state.studio =
                comic_strip_studio::regenerate_panel(&generator, &state.studio, index, &state.ctx)
                    .await?;
            print_studio(&state.studio);
        }
        "/move" => {
            let (index, args) = split_index(rest)?;
            let [dx, dy] = parse_floats::<2>(args)?;
            edit(state, index, BubbleEdit::Move { dx, dy })?;
        }
        "/resize" => {
            let (index, args) = split_index(rest)?;
            let (handle, deltas) = args
                .split_once(char::is_whitespace)
                .ok_or_else(|| anyhow!("usage: /resize <panel> <handle> <dx> <dy>"))?;
            let handle = ResizeHandle::parse(handle)
                .ok_or_else(|| anyhow!("unknown resize handle '{}'", handle))?;
            let [dx, dy] = parse_floats::<2>(deltas)?;
            edit(state, index, BubbleEdit::Resize { handle, dx, dy })?;
        }
        "/tail" => {
            let (index, args) = split_index(rest)?;
            let edit_kind = match parse_floats::<2>(args) {
                Ok([x, y]) => BubbleEdit::PointTail { x, y },
                Err(_) => BubbleEdit::SetTail(TailAnchor::parse(args)?),
            };
            edit(state, index, edit_kind)?;
        }
        "/style" => {
            let (index, style) = split_index(rest)?;
            edit(state, index, BubbleEdit::SetStyle(BubbleStyle::parse(style)?))?;
        }
        "/post" => {
            let generator = state.generator()?.clone();
            state.studio = comic_strip_studio::attach_post(&generator, state.studio.clone()).await;
            match state.studio.post() {
                Some(post) => println!("{}", post.to_text()),
                None => println!("no post generated"),
            }
        }
        "/continue" => {
            let (kind, topic) = match rest.split_once(char::is_whitespace) {
                Some((kind, topic)) => (kind, topic.trim()),
                None => (rest, ""),
            };
            let kind = if kind.is_empty() {
                ContinuationType::Continue
            } else {
                ContinuationType::parse(kind)?
            };
            let generator = state.generator()?.clone();
            state.studio =
                comic_strip_studio::continue_story(&generator, &state.studio, topic, kind).await?;
            print_studio(&state.studio);
        }
        "/export" => {
            let layout = if rest.is_empty() {
                state.settings.layout
            } else {
                StripLayout::parse(rest)?
            };
            let files = comic_strip_studio::write_outputs(
                &state.studio,
                &state.ctx,
                layout,
                state.settings.strip_options(),
                &state.config.output_dir(),
            )?;
            for file in files {
                println!("{}", file.display());
            }
        }
        "/reset" => {
            state.studio = state.studio.reset();
            println!("studio reset");
        }
        _ => eprintln!("unknown command: {}", input),
    }
    Ok(false)
}

fn edit(state: &mut InteractiveState, index: usize, edit: BubbleEdit) -> Result<()> {
    state.studio = state.studio.edit_bubble(index, edit, &state.ctx)?;
    if let Some(controller) = state.studio.panels().get(index) {
        print_panel(controller);
    }
    Ok(())
}

/// Splits `"<1-based panel> rest"` into a zero-based index and the rest.
fn split_index(input: &str) -> Result<(usize, &str)> {
    let (index, rest) = split_index_optional(input)?;
    let rest = rest.ok_or_else(|| anyhow!("missing argument after #{}", index + 1))?;
    Ok((index, rest))
}

fn split_index_optional(input: &str) -> Result<(usize, Option<&str>)> {
    let (head, rest) = match input.trim().split_once(char::is_whitespace) {
        Some((head, rest)) => (head, Some(rest.trim()).filter(|rest| !rest.is_empty())),
        None => (input.trim(), None),
    };
    let number: usize = head
        .parse()
        .map_err(|_| anyhow!("expected a number, got '{}'", head))?;
    if number == 0 {
        return Err(anyhow!("numbers start at 1"));
    }
    Ok((number - 1, rest))
}

fn parse_floats<const N: usize>(input: &str) -> Result<[f32; N]> {
    let values = input
        .split_whitespace()
        .map(|value| {
            value
                .parse::<f32>()
                .map_err(|_| anyhow!("expected a number, got '{}'", value))
        })
        .collect::<Result<Vec<_>>>()?;
    values
        .try_into()
        .map_err(|_| anyhow!("expected {} numbers", N))
}

fn print_studio(studio: &Studio) {
    println!(
        "topic: {} | category: {} | art: {} | frame: {} | episode {}",
        studio.topic(),
        studio.category(),
        studio.art_style(),
        studio.frame_style().as_str(),
        studio.episode()
    );
    let Some(script) = studio.script() else {
        println!("(no script yet)");
        return;
    };
    for (idx, character) in script.characters.iter().enumerate() {
        let portrait = if character.portrait.is_some() { "portrait" } else { "no portrait" };
        println!("  #{} {} ({}): {}", idx + 1, character.name, portrait, character.description);
    }
    for (panel, controller) in script.panels.iter().zip(studio.panels()) {
        println!(
            "  [{}] {}: {}",
            panel.panel,
            panel.speaker.as_wire(),
            panel.dialogue
        );
        print_panel(controller);
    }
}

fn print_panel(controller: &PanelController) {
    match (controller.bubble(), controller.layout()) {
        (Some(bubble), Some(layout)) => println!(
            "      {} | {} at ({:.0}, {:.0}) {:.0}x{:.0}, tail {} | {} lines @ {:.0}px{}",
            controller.phase().as_str(),
            bubble.style.as_str(),
            bubble.rect.x,
            bubble.rect.y,
            bubble.rect.width,
            bubble.rect.height,
            bubble.tail.as_str(),
            layout.lines.len(),
            layout.font_size,
            if layout.clipped { " (clipped)" } else { "" }
        ),
        _ => println!("      {}", controller.phase().as_str()),
    }
}

fn print_interactive_help() {
    println!("Commands:");
    println!("  /quit, /exit                      Exit interactive mode");
    println!("  /topic <text>                     Set topic (plain input does the same)");
    println!("  /category <name>                  Set category");
    println!("  /art-style <name>                 Set art style");
    println!("  /format <single|serial>           Set story format");
    println!("  /layout <grid|horizontal|vertical> Set export layout");
    println!("  /ideas [category]                 Suggest topics");
    println!("  /script [topic]                   Generate a script");
    println!("  /show                             Show script and panel state");
    println!("  /rename <n> <name>                Rename character n");
    println!("  /speaker <panel> <name|thought|none> Set the speaker");
    println!("  /dialogue <panel> <text>          Replace dialogue");
    println!("  /frame <style>                    speech-bubble, simple, webtoon, narration, cinematic");
    println!("  /portrait <n> [path]              Generate or load a character sheet");
    println!("  /images                           Generate sheets and all panel art");
    println!("  /image <panel> <path>             Load panel art from a file");
    println!("  /regen <panel>                    Redraw one panel with the image model");
    println!("  /move <panel> <dx> <dy>           Move the bubble");
    println!("  /resize <panel> <handle> <dx> <dy> Resize (top-left, top, ..., bottom-right)");
    println!("  /tail <panel> <anchor | x y>      Set the tail anchor");
    println!("  /style <panel> <style>            speech, thought, shout, narration, caption");
    println!("  /post                             Generate the Instagram post");
    println!("  /continue [continue|end] [topic]  Write the next episode");
    println!("  /export [layout]                  Write panels, strip, script and post");
    println!("  /reset                            Start over");
}
