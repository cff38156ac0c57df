use std::{env, path::Path, process};

use hymn::Hymn;

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().skip(1).collect();
    let args: Vec<&str> = args.iter().map(String::as_str).collect();

    let mut vm = Hymn::new();
    let result = match args.as_slice() {
        [] | ["-h"] | ["--help"] => {
            print_usage();
            return;
        }
        ["-b", "-c", source] => vm.debug_interpret(source),
        ["-c", source] => vm.interpret(source),
        ["-b", file] => vm.interpret_file(Path::new(file), true),
        [file] if !file.starts_with('-') => vm.interpret_file(Path::new(file), false),
        [_, unknown, ..] | [unknown] => {
            eprintln!("Unknown argument: {}", unknown);
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        vm.report(&e);
        process::exit(1);
    }
}

fn print_usage() {
    println!("HYMN - Scripting Language");
    println!();
    println!("Usage:");
    println!("  hymn <file.hm>            Run a script");
    println!("  hymn -c <source>          Run source text");
    println!("  hymn -b <file.hm>         Print bytecode, then run a script");
    println!("  hymn -b -c <source>       Print bytecode, then run source text");
    println!("  hymn --help, -h           Show this help");
}
