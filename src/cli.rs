use std::fs::read_to_string;
use std::path::PathBuf;

use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(raw(setting = "structopt::clap::AppSettings::ColoredHelp"))]
#[structopt(name = "element-map", about = "Topological element-map save inspector", author = "element-map", version = "0.1.0")]
pub struct Opt {
    #[structopt(short = "d", long = "debug")]
    pub debug: bool,

    /// Re-serialize the restored graph and print it to stdout after loading.
    #[structopt(short = "r", long = "resave")]
    pub resave: bool,

    /// Save-file(s) to restore. A name with no path is looked up relative to
    /// the current working directory.
    #[structopt(name = "FILE x N", parse(from_os_str))]
    files: Vec<PathBuf>,
}

impl Opt {
    pub fn try_read_files(&self) -> Result<Vec<String>, std::io::Error> {
        self.files.iter().map(|x| try_read_cwd(x)).collect()
    }
}

fn try_read_cwd(suggestion: &PathBuf) -> Result<String, std::io::Error> {
    match std::env::current_dir() {
        Err(_) => read_to_string(suggestion),
        Ok(mut path) => {
            path.push(suggestion.clone());
            read_to_string(path)
        }
    }
}
