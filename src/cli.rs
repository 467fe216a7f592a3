use clap::{Parser, ValueEnum};

use crate::bsa::ArchiveType;

#[derive(Parser, Debug)]
#[command(name = "rbsa")]
#[command(version)]
#[command(about = "List, extract and build Bethesda BSA archives", long_about = None)]
#[command(after_help = "Examples:\n  \
  rbsa Meshes.bsa -x *.kf          extract all files except animations\n  \
  rbsa -p Misc.bsa readme.txt      print a file to stdout\n  \
  rbsa -v Textures.bsa             list files with sizes and hashes\n  \
  rbsa new.bsa -c data --compress  build new.bsa from the data directory")]
pub struct Cli {
    /// BSA file path
    #[arg(value_name = "FILE")]
    pub file: String,

    /// Files to extract (default: all)
    #[arg(value_name = "FILES")]
    pub files: Vec<String>,

    /// List files (short format)
    #[arg(short = 'l')]
    pub list: bool,

    /// List verbosely: size, compression, offset and hash
    #[arg(short = 'v')]
    pub verbose: bool,

    /// Check every file name against its stored hash
    #[arg(short = 't')]
    pub test: bool,

    /// Extract files to pipe, no messages
    #[arg(short = 'p')]
    pub pipe: bool,

    /// Extract files into exdir
    #[arg(short = 'd', value_name = "DIR")]
    pub extract_dir: Option<String>,

    /// Exclude files that follow
    #[arg(short = 'x', value_name = "FILE", num_args = 1..)]
    pub exclude: Vec<String>,

    /// Never overwrite existing files
    #[arg(short = 'n')]
    pub never_overwrite: bool,

    /// Overwrite files WITHOUT prompting
    #[arg(short = 'o')]
    pub overwrite: bool,

    /// Quiet mode (-qq => quieter)
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,

    /// Do not validate name hashes while reading
    #[arg(long = "no-verify")]
    pub no_verify: bool,

    /// Create FILE from the contents of this directory
    #[arg(short = 'c', value_name = "SRC_DIR")]
    pub create: Option<String>,

    /// Compress files by default when creating
    #[arg(long = "compress")]
    pub compress: bool,

    /// Game the created archive is for
    #[arg(long = "game", value_enum, default_value_t = Game::Fallout3)]
    pub game: Game,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Game {
    Oblivion,
    /// Also Fallout: New Vegas and Skyrim
    Fallout3,
}

impl From<Game> for ArchiveType {
    fn from(game: Game) -> Self {
        match game {
            Game::Oblivion => ArchiveType::Oblivion,
            Game::Fallout3 => ArchiveType::Fallout3,
        }
    }
}

impl Cli {
    pub fn is_quiet(&self) -> bool {
        self.quiet > 0 || self.pipe
    }

    pub fn is_very_quiet(&self) -> bool {
        self.quiet > 1
    }

    /// Hashes are always checked in test mode.
    pub fn verify_hashes(&self) -> bool {
        self.test || !self.no_verify
    }

    pub fn should_overwrite(&self) -> bool {
        self.overwrite && !self.never_overwrite
    }
}
