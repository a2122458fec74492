// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use provisor::{
    config::Settings,
    path::default_settings_path,
    preflight::Preflight,
    prompt::InquirePrompter,
    target::{script::ScriptKind, TargetName},
    workflow::{PublishStep, Request, Workflow},
};

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::{path::PathBuf, process::exit};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "provisor [options] <provisor-command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Path to settings file.
    #[arg(short, long, global = true, value_name = "path")]
    pub settings: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<()> {
        let settings = match self.settings {
            Some(path) => Settings::load(path)?,
            None => Settings::load(default_settings_path()?)?,
        };

        match self.command {
            Command::Provision(opts) => run_provision(settings, opts),
            Command::Jenkins(opts) => run_jenkins(settings, opts),
            Command::Render(opts) => run_render(settings, opts),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Install requirements on target and publish its managed folder.
    #[command(override_usage = "provisor provision [options] <target>")]
    Provision(ProvisionOptions),

    /// Install Jenkins on target, publishing only if it ends up active.
    #[command(override_usage = "provisor jenkins [options] [<target>]")]
    Jenkins(JenkinsOptions),

    /// Print requirements script of target without touching anything.
    #[command(override_usage = "provisor render [options] <target>")]
    Render(RenderOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ProvisionOptions {
    /// Name of target to provision.
    #[arg(required = true, value_name = "target")]
    pub target: TargetName,

    /// Extra package to install.
    #[arg(short, long, value_name = "package")]
    pub package: Vec<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct JenkinsOptions {
    /// Name of target to install Jenkins on.
    #[arg(default_value = "jenkins", value_name = "target")]
    pub target: TargetName,

    /// Extra package to install.
    #[arg(short, long, value_name = "package")]
    pub package: Vec<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct RenderOptions {
    /// Name of target to render requirements script for.
    #[arg(required = true, value_name = "target")]
    pub target: TargetName,

    /// Render Jenkins flavor of requirements script.
    #[arg(short, long)]
    pub jenkins: bool,

    /// Extra package to install.
    #[arg(short, long, value_name = "package")]
    pub package: Vec<String>,
}

fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run() {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn run() -> Result<()> {
    Cli::parse().run()
}

fn run_provision(settings: Settings, opts: ProvisionOptions) -> Result<()> {
    let request = Request::new(opts.target, ScriptKind::Requirements).with_packages(opts.package);
    run_workflow(settings, request)
}

fn run_jenkins(settings: Settings, opts: JenkinsOptions) -> Result<()> {
    let request = Request::new(opts.target, ScriptKind::Jenkins).with_packages(opts.package);
    run_workflow(settings, request)
}

fn run_render(settings: Settings, opts: RenderOptions) -> Result<()> {
    let kind = if opts.jenkins {
        ScriptKind::Jenkins
    } else {
        ScriptKind::Requirements
    };
    let request = Request::new(opts.target, kind).with_packages(opts.package);
    print!("{}", request.render_script(&settings));

    Ok(())
}

fn run_workflow(settings: Settings, request: Request) -> Result<()> {
    let connector = settings.transport.clone();
    let workflow = Workflow::new(Preflight::current(), settings, connector);
    let report = workflow.run(&request, &mut InquirePrompter)?;

    info!("service status of {}: {}", request.target, report.status);
    if let PublishStep::Done(outcome) = report.publish {
        info!("publish result: {outcome:?}");
    }

    Ok(())
}
