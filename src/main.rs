#![forbid(unsafe_code)]

use std::cell::RefCell;
use std::rc::Rc;

use structopt::StructOpt;

use element_map::element_map::ElementMap;
use element_map::serializer;

use crate::cli::Opt;

pub mod cli;

fn main() {
    env_logger::init();
    let opt = Opt::from_args();

    if opt.debug {
        println!("CLI returned these arguments : {:#?}", opt);
    }

    let save_file_strings = match opt.try_read_files() {
        Ok(strings) => strings,
        Err(e) => {
            eprintln!("failed to read input file(s): {}", e);
            std::process::exit(1);
        }
    };

    for source in save_file_strings {
        match serializer::restore(&source) {
            Ok(map) => report(&map, opt.resave),
            Err(e) => eprintln!("failed to restore element map: {}", e),
        }
    }
}

fn report(map: &Rc<RefCell<ElementMap>>, resave: bool) {
    let borrowed = map.borrow();
    println!(
        "ElementMap #{}: {} mapped name(s), {} total element(s), child element map: {}",
        borrowed.id(),
        borrowed.mapped_name_count(),
        borrowed.size(),
        borrowed.has_child_element_map(),
    );
    drop(borrowed);

    if resave {
        let mut buf = Vec::new();
        match serializer::save(map, &mut buf) {
            Ok(()) => match String::from_utf8(buf) {
                Ok(text) => println!("{}", text),
                Err(e) => eprintln!("re-saved output was not valid UTF-8: {}", e),
            },
            Err(e) => eprintln!("failed to re-save element map: {}", e),
        }
    }
}
