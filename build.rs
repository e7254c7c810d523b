// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn package_arg() -> Arg {
    Arg::new("alias").required(true).help("Package alias")
}

fn build_cli() -> Command {
    Command::new("apex")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Apex Contributors")
        .about("Package versioning, distribution and upgrades for Apex")
        .subcommand_required(true)
        .arg(
            Arg::new("root")
                .long("root")
                .global(true)
                .default_value(".")
                .help("Project root"),
        )
        .arg(
            Arg::new("db_path")
                .long("db-path")
                .global(true)
                .value_name("PATH")
                .help("Database path (default: <root>/.apex/apex.db)"),
        )
        .arg(
            Arg::new("svn_bin")
                .long("svn-bin")
                .global(true)
                .default_value("svn")
                .help("svn binary to invoke"),
        )
        .arg(
            Arg::new("ssh_key")
                .long("ssh-key")
                .global(true)
                .value_name("PATH")
                .help("SSH private key for svn+ssh access"),
        )
        .arg(
            Arg::new("account")
                .long("account")
                .global(true)
                .help("Account used to authenticate against the repository API"),
        )
        .arg(
            Arg::new("slave")
                .long("slave")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("This instance replicates a master's database; skip migrations"),
        )
        .arg(
            Arg::new("no_upgrade_verify")
                .long("no-upgrade-verify")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Do not verify signatures of upgrade diffs"),
        )
        .arg(
            Arg::new("yes")
                .short('y')
                .long("yes")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Answer yes to every question"),
        )
        .subcommand(Command::new("init").about("Initialize the Apex package database"))
        .subcommand(
            Command::new("repo")
                .about("Manage repositories")
                .subcommand(
                    Command::new("add")
                        .about("Add a repository")
                        .arg(Arg::new("alias").required(true).help("Repository alias"))
                        .arg(Arg::new("host").required(true).help("SVN host"))
                        .arg(Arg::new("api_url").long("api-url").help("Base URL of the JSON API"))
                        .arg(
                            Arg::new("local_path")
                                .long("local-path")
                                .help("Path of a repository on this machine, accessed over file://"),
                        ),
                )
                .subcommand(Command::new("list").about("List repositories"))
                .subcommand(
                    Command::new("remove")
                        .about("Remove a repository")
                        .arg(Arg::new("alias").required(true)),
                ),
        )
        .subcommand(
            Command::new("package")
                .about("Manage packages")
                .subcommand(
                    Command::new("checkout")
                        .about("Check out a package's working copy")
                        .arg(Arg::new("serial").required(true).help("Package as author/alias"))
                        .arg(Arg::new("repo").long("repo").help("Repository alias"))
                        .arg(Arg::new("dir").long("dir").help("Directory to check out (default: trunk)")),
                )
                .subcommand(
                    Command::new("commit")
                        .about("Compile, sign and commit a package")
                        .arg(package_arg())
                        .arg(Arg::new("message").short('m').long("message").help("Commit message"))
                        .arg(Arg::new("file").long("file").help("Read the commit message from a file")),
                )
                .subcommand(
                    Command::new("release")
                        .about("Tag trunk as a release")
                        .arg(package_arg())
                        .arg(Arg::new("version").long("version").help("Version to release"))
                        .arg(
                            Arg::new("breaking")
                                .long("breaking")
                                .action(ArgAction::SetTrue)
                                .help("Flag the release as containing breaking changes"),
                        ),
                )
                .subcommand(
                    Command::new("install")
                        .about("Install packages")
                        .arg(
                            Arg::new("serials")
                                .required(true)
                                .num_args(1..)
                                .help("Packages as author/alias"),
                        )
                        .arg(Arg::new("repo").long("repo").help("Repository alias"))
                        .arg(
                            Arg::new("dev")
                                .long("dev")
                                .action(ArgAction::SetTrue)
                                .help("Install the development head (trunk)"),
                        )
                        .arg(Arg::new("version").long("version").help("Install an exact release"))
                        .arg(
                            Arg::new("noverify")
                                .long("noverify")
                                .action(ArgAction::SetTrue)
                                .help("Skip signature verification"),
                        )
                        .arg(Arg::new("license_id").long("license-id").help("License id for commercial packages")),
                )
                .subcommand(
                    Command::new("upgrade")
                        .about("Upgrade installed packages to their newest release")
                        .arg(Arg::new("aliases").num_args(0..).help("Package aliases (default: all)"))
                        .arg(
                            Arg::new("confirm")
                                .long("confirm")
                                .action(ArgAction::SetTrue)
                                .help("Accept breaking releases without asking"),
                        )
                        .arg(
                            Arg::new("noverify")
                                .long("noverify")
                                .action(ArgAction::SetTrue)
                                .help("Skip signature verification"),
                        ),
                )
                .subcommand(
                    Command::new("rollback")
                        .about("Undo upgrades")
                        .arg(Arg::new("alias").help("Package alias"))
                        .arg(Arg::new("version").help("Version the package was upgraded to"))
                        .arg(
                            Arg::new("since")
                                .long("since")
                                .help("Undo every upgrade recorded at or after this transaction"),
                        ),
                )
                .subcommand(Command::new("list").about("List installed packages")),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completion scripts")
                .arg(
                    Arg::new("shell")
                        .required(true)
                        .value_parser(["bash", "zsh", "fish", "powershell", "elvish"])
                        .help("Shell type"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory
    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();
    man.render(&mut buffer).expect("Failed to render man page");

    let man_path = man_dir.join("apex.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");

    println!("cargo:warning=Man page generated at {}", man_path.display());
}
