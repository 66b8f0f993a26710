mod logger;

use std::path::PathBuf;
use std::process;

use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use flatfs::layout::{MAX_BLOCKS, MIN_BLOCKS};
use flatfs::{Flatfs, ImageFile};
use flatfs_fuse::MountConfig;
use log::info;

use crate::logger::Logger;

pub fn main() {
    let matches = App::new("flatfs")
        .about("Create and mount flatfs disk images")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .multiple(true)
                .global(true)
                .help("Log more (repeat for debug and trace output)"),
        )
        .subcommand(
            SubCommand::with_name("format")
                .about("Create a blank image and lay out an empty filesystem")
                .arg(
                    Arg::with_name("image")
                        .required(true)
                        .help("Image file to create (replaced if it exists)"),
                )
                .arg(
                    Arg::with_name("blocks")
                        .long("blocks")
                        .takes_value(true)
                        .default_value("10240")
                        .help("Image size in 512 byte blocks"),
                ),
        )
        .subcommand(
            SubCommand::with_name("mount")
                .about("Serve an image at a mount point until it is unmounted")
                .arg(Arg::with_name("image").required(true).help("Image file"))
                .arg(
                    Arg::with_name("mountpoint")
                        .required(true)
                        .help("Existing, empty directory"),
                )
                .arg(
                    Arg::with_name("allow-other")
                        .long("allow-other")
                        .help("Let other users access the mount"),
                )
                .arg(
                    Arg::with_name("auto-unmount")
                        .long("auto-unmount")
                        .help("Unmount when this process exits"),
                ),
        )
        .get_matches();

    let verbosity = matches.subcommand().1.map_or(0, |sub| sub.occurrences_of("verbose"));
    if let Err(err) = Logger::init(verbosity.max(matches.occurrences_of("verbose"))) {
        eprintln!("flatfs: cannot install logger: {}", err);
    }

    let result = match matches.subcommand() {
        ("format", Some(args)) => format(args),
        ("mount", Some(args)) => mount(args),
        _ => Err("unknown command".to_string()),
    };
    if let Err(err) = result {
        eprintln!("flatfs: {}", err);
        process::exit(1);
    }
}

fn format(args: &ArgMatches) -> Result<(), String> {
    let image = PathBuf::from(args.value_of("image").unwrap_or_default());
    let blocks: usize = args
        .value_of("blocks")
        .unwrap_or_default()
        .parse()
        .map_err(|err| format!("--blocks: {}", err))?;
    if blocks < MIN_BLOCKS {
        return Err(format!("an image needs at least {} blocks", MIN_BLOCKS));
    }
    if blocks > MAX_BLOCKS {
        info!(
            "only the first {} of {} blocks will be allocatable",
            MAX_BLOCKS, blocks
        );
    }

    let dev = ImageFile::create(&image, blocks)
        .map_err(|err| format!("cannot create {}: {}", image.display(), err))?;
    // Mounting a blank image lays out the root block and bitmap.
    let fs = Flatfs::mount(dev).map_err(|err| err.to_string())?;
    fs.sync().map_err(|err| err.to_string())?;
    info!("formatted {} with {} blocks", image.display(), blocks);
    Ok(())
}

fn mount(args: &ArgMatches) -> Result<(), String> {
    let config = MountConfig {
        image: PathBuf::from(args.value_of("image").unwrap_or_default()),
        mountpoint: PathBuf::from(args.value_of("mountpoint").unwrap_or_default()),
        allow_other: args.is_present("allow-other"),
        auto_unmount: args.is_present("auto-unmount"),
    };
    flatfs_fuse::mount(&config).map_err(|err| err.to_string())
}
