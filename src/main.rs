//! Interactive ambient mixer demo
//!
//! Preloads a catalog (built-in by default, or a JSON file given as the
//! first argument), then takes single-line commands on stdin.

use ambimix::{
    AudioOutput, MixerConfig, MixerEngine, SoundCatalog, TimerConfig, TimerController, TrackId,
    TrackLoader,
};
use anyhow::{Context, Result};
use std::io::BufRead;
use std::sync::Arc;

fn main() -> Result<()> {
    env_logger::init();

    let catalog = match std::env::args().nth(1) {
        Some(path) => {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read catalog {path}"))?;
            SoundCatalog::from_json(&json).context("failed to parse catalog")?
        }
        None => SoundCatalog::builtin(),
    };

    let output = AudioOutput::open_default()?;
    let loader = TrackLoader::new(&output);
    let engine = Arc::new(MixerEngine::new(MixerConfig::default())?);
    engine.preload(&loader, &catalog);
    let timer = TimerController::new(Arc::clone(&engine), TimerConfig::default());

    let events = engine.subscribe();
    std::thread::spawn(move || {
        for event in events {
            println!("event: {event:?}");
        }
    });

    print_state(&engine, &timer);
    println!("commands: t <id> | v <id> <vol> | g <vol> | play | pause | start | stop | mode | d <minutes> | l | q");

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.as_slice() {
            ["t", id] => engine.toggle(&TrackId::new(*id)),
            ["v", id, vol] => engine.set_track_volume(&TrackId::new(*id), vol.parse()?),
            ["g", vol] => engine.set_global_volume(vol.parse()?),
            ["play"] => engine.play_all(),
            ["pause"] => engine.pause_all(),
            ["start"] => timer.start()?,
            ["stop"] => timer.stop(),
            ["mode"] => timer.toggle_mode(),
            ["d", minutes] => timer.set_preset_minutes(minutes.parse()?),
            ["l"] => print_state(&engine, &timer),
            ["q"] => break,
            [] => {}
            _ => println!("unknown command"),
        }
    }

    timer.stop();
    engine.cleanup();
    Ok(())
}

fn print_state(engine: &MixerEngine, timer: &TimerController) {
    let mixer = engine.snapshot();
    for track in &mixer.tracks {
        println!(
            "{:12} [{:9}] {} vol {:.2}",
            track.id.as_str(),
            format!("{:?}", track.phase).to_lowercase(),
            if track.is_playing { "playing" } else { "stopped" },
            track.volume,
        );
    }
    if let Some(error) = &mixer.error {
        println!("error: {error}");
    }
    let t = timer.snapshot();
    println!(
        "timer: {:?} {} / {} ({})",
        t.mode,
        t.formatted_remaining(),
        t.formatted_total(),
        if t.running { "running" } else { "idle" },
    );
}
