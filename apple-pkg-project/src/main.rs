// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    apple_pkg_project::{
        build_info::BuildInfoFormat,
        building::{build_project, BuildOptions},
        importing::import_pkg,
        project::{create_template_project, PkgProject},
        PkgProjectError, PkgResult,
    },
    clap::{Arg, ArgMatches, Command},
    log::LevelFilter,
    std::path::{Path, PathBuf},
};

fn build_info_format(matches: &ArgMatches) -> Option<BuildInfoFormat> {
    if matches.is_present("json") {
        Some(BuildInfoFormat::Json)
    } else if matches.is_present("yaml") {
        Some(BuildInfoFormat::Yaml)
    } else {
        None
    }
}

fn existing_project(project_dir: &Path) -> PkgResult<PkgProject> {
    if !project_dir.exists() {
        return Err(PkgProjectError::ProjectNotFound(project_dir.to_path_buf()));
    }
    if !project_dir.is_dir() {
        return Err(PkgProjectError::NotADirectory(project_dir.to_path_buf()));
    }

    Ok(PkgProject::new(project_dir))
}

fn main_impl() -> PkgResult<()> {
    let matches = Command::new("Build Apple installer packages from project directories")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Gregory Szorc <gregory.szorc@gmail.com>")
        .about("A tool for building a package from the contents of a project directory.")
        .arg_required_else_help(true)
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .multiple_occurrences(true)
                .help("Increase logging verbosity. Can be specified multiple times."),
        )
        .arg(
            Arg::new("create")
                .long("create")
                .help("Creates a new empty project with default settings at given path."),
        )
        .arg(
            Arg::new("import")
                .long("import")
                .takes_value(true)
                .value_name("PKG")
                .conflicts_with("create")
                .help(
                    "Imports an existing package PKG as a package project, \
                     creating the project directory.",
                ),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .help("Create build-info file in JSON format. Useful with --create and --import."),
        )
        .arg(
            Arg::new("yaml")
                .long("yaml")
                .conflicts_with("json")
                .help("Create build-info file in YAML format. Useful with --create and --import."),
        )
        .arg(
            Arg::new("export_bom_info")
                .long("export-bom-info")
                .help(
                    "Extracts the bill-of-materials file from the output package and \
                     exports it as Bom.txt under the project directory. Useful for \
                     tracking owner, group and mode of the payload in git.",
                ),
        )
        .arg(
            Arg::new("sync")
                .long("sync")
                .help(
                    "Use Bom.txt to set modes of files in the payload directory and \
                     create missing empty directories. Useful after a git clone or \
                     pull. No build is performed.",
                ),
        )
        .arg(
            Arg::new("quiet")
                .long("quiet")
                .help("Inhibits status messages. Any error messages are still printed."),
        )
        .arg(
            Arg::new("force")
                .long("force")
                .short('f')
                .help("Forces creation of the project directory if it already exists."),
        )
        .arg(
            Arg::new("skip_notarization")
                .long("skip-notarization")
                .help("Skips the whole notarization process when configured in build-info."),
        )
        .arg(
            Arg::new("skip_stapling")
                .long("skip-stapling")
                .help("Skips only the stapling part of the notarization process."),
        )
        .arg(
            Arg::new("project_dir")
                .required(true)
                .value_name("PROJECT_DIRECTORY")
                .help("Path to the package project directory."),
        )
        .get_matches();

    let log_level = if matches.is_present("quiet") {
        LevelFilter::Warn
    } else {
        match matches.occurrences_of("verbose") {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_level.as_str()),
    );

    // Disable log context except at higher log levels.
    if log_level <= LevelFilter::Info {
        builder
            .format_timestamp(None)
            .format_level(false)
            .format_target(false);
    }

    builder.init();

    let project_dir = PathBuf::from(matches.value_of("project_dir").expect("required argument"));
    let format = build_info_format(&matches);

    if matches.is_present("create") {
        create_template_project(
            &project_dir,
            format.unwrap_or(BuildInfoFormat::Plist),
            matches.is_present("force"),
        )?;

        return Ok(());
    }

    if let Some(pkg_path) = matches.value_of("import") {
        import_pkg(
            Path::new(pkg_path),
            &project_dir,
            format.unwrap_or(BuildInfoFormat::Plist),
        )?;

        return Ok(());
    }

    let project = existing_project(&project_dir)?;

    if matches.is_present("sync") {
        project.sync_from_bom_text(format)?;

        return Ok(());
    }

    build_project(
        &project,
        &BuildOptions {
            quiet: matches.is_present("quiet"),
            export_bom_info: matches.is_present("export_bom_info"),
            skip_notarization: matches.is_present("skip_notarization"),
            skip_stapling: matches.is_present("skip_stapling"),
            build_info_format: format,
        },
    )
}

fn main() {
    let exit_code = match main_impl() {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("Error: {}", err);
            1
        }
    };

    std::process::exit(exit_code)
}
