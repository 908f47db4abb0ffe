// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
use anyhow::{bail, Context, Result};
use clap::Parser;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

const TARGET: &str = "thumbv7m-none-eabi";

#[derive(Debug, Parser)]
enum Xtask {
    /// Builds the loader firmware for one board
    Build {
        /// Board name, as in the `target-board-*` features (`sam3x-ek`, `adk2`)
        #[clap(long)]
        board: String,
        /// Route log output over RTT
        #[clap(long)]
        defmt: bool,
        /// Copy the finished ELF here
        #[clap(long)]
        out: Option<PathBuf>,
    },
}

// borrowed from hubris
fn remap_paths() -> Result<BTreeMap<PathBuf, &'static str>> {
    // Panic messages in crates have a long prefix; we'll shorten it using
    // the --remap-path-prefix argument to reduce message size.  We'll remap
    // local crates to /sam3x-link, crates.io to /crates.io, and git
    // dependencies to /git
    let mut remap_paths = BTreeMap::new();

    if let Ok(home) = std::env::var("CARGO_HOME") {
        let cargo_home = PathBuf::from(home);
        let cargo_git = cargo_home.join("git").join("checkouts");
        remap_paths.insert(cargo_git, "/git");

        let registry_src = cargo_home.join("registry").join("src");
        remap_paths.insert(registry_src.join("github.com-1ecc6299db9ec823"), "/crates.io");
        remap_paths.insert(registry_src.join("index.crates.io-6f17d22bba15001f"), "/crates.io");
    }

    if let Ok(dir) = std::env::var("CARGO_MANIFEST_DIR") {
        let mut root = PathBuf::from(dir);
        root.pop();
        remap_paths.insert(root, "/sam3x-link");
    }
    Ok(remap_paths)
}

fn build(board: &str, defmt: bool, out: Option<PathBuf>) -> Result<()> {
    let mut rustflags = remap_paths()?.iter().fold(String::new(), |mut output, r| {
        let _ = write!(output, " --remap-path-prefix={}={}", r.0.display(), r.1);
        output
    });
    rustflags.push_str(" -C link-arg=-Tlink.x");

    let mut features = format!("target-board-{board},rt");
    if defmt {
        features.push_str(",defmt-log");
        rustflags.push_str(" -C link-arg=-Tdefmt.x");
    }

    let cargo = std::env::var_os("CARGO").unwrap_or_else(|| "cargo".into());
    let mut command = Command::new(cargo);
    command
        .arg("build")
        .arg("--release")
        .arg("--target")
        .arg(TARGET)
        .arg("--no-default-features")
        .arg("--features")
        .arg(&features)
        .arg("--bin")
        .arg("loader")
        .env("RUSTFLAGS", rustflags);

    let status = command
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()?;

    if !status.success() {
        bail!("build failed: {}", status);
    }

    if let Some(out) = out {
        let elf = PathBuf::from("target").join(TARGET).join("release").join("loader");
        std::fs::copy(&elf, &out)
            .with_context(|| format!("copying {} to {}", elf.display(), out.display()))?;
    }
    Ok(())
}

fn main() -> Result<()> {
    let xtask = Xtask::parse();

    match xtask {
        Xtask::Build { board, defmt, out } => {
            build(&board, defmt, out)?;
        }
    }
    Ok(())
}
