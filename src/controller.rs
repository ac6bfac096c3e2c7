use anyhow::Result;
use crossterm::{
    style::{self, Colorize, Styler},
    QueueableCommand,
};
use log::{debug, info, warn};
use std::{
    io::{stdout, Write},
    path::{Component, Path, PathBuf},
};
use structopt::{clap::ErrorKind, StructOpt};

use crate::{
    arguments::{ComposeArgs, RoutingDecision, BUILD_SUBCOMMAND},
    config::{Settings, DEFAULT_COMPOSE_FILE},
    errors::{ConfigError, ConfigResult},
    models::{BuildSpec, Invocation},
    services::{CommandBackend, ComposerFrontend},
};

const BUILDKIT_ENV: (&str, &str) = ("DOCKER_BUILDKIT", "1");

/// Flags of `docker-compose build`.
#[derive(Debug, StructOpt)]
#[structopt(name = "build", about = "Build a service image with BuildKit.")]
pub struct BuildOpt {
    /// Set build-time variables for services.
    #[structopt(long = "build-arg", number_of_values = 1)]
    build_args: Vec<String>,

    /// The path to the docker-compose.yml file.
    #[structopt(short = "f", long = "file", number_of_values = 1)]
    files: Vec<String>,

    /// Compress the build context using gzip.
    #[structopt(long)]
    compress: bool,

    /// Always remove intermediate containers.
    #[structopt(long, alias = "force-rm")]
    force_remove: bool,

    /// Do not use cache when building the image.
    #[structopt(long)]
    no_cache: bool,

    /// Always attempt to pull a newer version of the image.
    #[structopt(long)]
    pull: bool,

    /// Sets memory limit for the build container.
    #[structopt(short, long)]
    memory: Option<String>,

    /// Build images in parallel.
    #[structopt(long)]
    parallel: bool,

    services: Vec<String>,
}

/// Where the manifest lives and what it is called once resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestLocation {
    pub path: PathBuf,
    pub base_dir: PathBuf,
}

pub struct Controller {
    backend: Box<dyn CommandBackend>,
    frontend: Box<dyn ComposerFrontend>,
    settings: Settings,
}

impl Controller {
    pub fn init<B, F>(settings: Settings, backend: B, frontend: F) -> Controller
    where
        B: 'static + CommandBackend,
        F: 'static + ComposerFrontend,
    {
        Controller {
            backend: Box::new(backend),
            frontend: Box::new(frontend),
            settings,
        }
    }

    /// Runs whatever `decision` asks for and returns the exit code to leave with.
    pub fn dispatch(&mut self, decision: RoutingDecision) -> Result<i32> {
        match decision {
            RoutingDecision::Build(args) => self.build(&args),
            RoutingDecision::Passthrough(args) => {
                let invocation = Invocation::new(self.settings.orchestrator.clone(), args);
                self.backend.run(&invocation)
            }
        }
    }

    pub fn build(&mut self, args: &ComposeArgs) -> Result<i32> {
        let opt = match parse_build_flags(&args.subcommand_args) {
            Ok(opt) => opt,
            Err(err)
                if err.kind == ErrorKind::HelpDisplayed
                    || err.kind == ErrorKind::VersionDisplayed =>
            {
                println!("{}", err.message);
                return Ok(0);
            }
            Err(err) => return Err(ConfigError::BuildFlags(err.message).into()),
        };

        let invocation = self.build_invocation(args, &opt)?;
        self.backend.run(&invocation)
    }

    /// Resolves the manifest and service, and assembles the image builder
    /// command without running it.
    pub fn build_invocation(&mut self, args: &ComposeArgs, opt: &BuildOpt) -> Result<Invocation> {
        if !args.global_args.is_empty() {
            warn!("ignoring global flags {:?} for build", args.global_args);
        }
        if opt.parallel {
            warn!("--parallel has no effect, only one service is built");
        }

        let service_name = opt.services.first().ok_or(ConfigError::MissingService)?;
        if opt.services.len() > 1 {
            warn!("building {:?} only, ignoring {:?}", service_name, &opt.services[1..]);
        }

        let compose_file = select_compose_file(
            &self.settings,
            args.compose_files.iter().chain(opt.files.iter()).cloned().collect(),
        )?;
        let location = locate_manifest(&self.settings.working_dir, &compose_file);
        info!("found compose file {:?}", location.path);

        print_status(service_name, &compose_file)?;

        let manifest = self.frontend.manifest(&location.path)?;
        info!("parsed manifest with {} services", manifest.services.len());

        let build = manifest
            .service(service_name)
            .ok_or_else(|| ConfigError::UnknownService(service_name.clone()))?
            .build
            .as_ref()
            .ok_or_else(|| ConfigError::MissingBuild(service_name.clone()))?;
        if !build.cache_from.is_empty() || !build.target.is_empty() {
            warn!(
                "cache_from {:?} and target {:?} of {:?} are not passed to the builder",
                build.cache_from, build.target, service_name
            );
        }

        let project_name = project_name(&self.settings, args, &location.base_dir);
        info!("project name {:?}", project_name);

        let mut invocation = Invocation::new(
            self.settings.builder.clone(),
            builder_args(build, opt, &image_tag(&project_name, service_name)),
        );
        invocation
            .env
            .push((BUILDKIT_ENV.0.into(), BUILDKIT_ENV.1.into()));
        invocation.current_dir = Some(location.base_dir);

        Ok(invocation)
    }
}

pub fn parse_build_flags(args: &[String]) -> structopt::clap::Result<BuildOpt> {
    let argv = std::iter::once(BUILD_SUBCOMMAND).chain(args.iter().map(String::as_str));
    BuildOpt::from_iter_safe(argv)
}

/// `COMPOSE_FILE` replaces every file given on the command line.
pub fn select_compose_file(settings: &Settings, files: Vec<String>) -> ConfigResult<String> {
    let files = match &settings.compose_file {
        Some(file) => vec![file.clone()],
        None => files,
    };

    match files.len() {
        0 => Ok(DEFAULT_COMPOSE_FILE.into()),
        1 => Ok(files.into_iter().next().unwrap_or_default()),
        _ => Err(ConfigError::AmbiguousManifest(files)),
    }
}

pub fn locate_manifest(working_dir: &Path, compose_file: &str) -> ManifestLocation {
    let path = normalize(&working_dir.join(compose_file));
    let base_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| working_dir.to_path_buf());

    ManifestLocation { path, base_dir }
}

/// Resolves `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut components: Vec<Component> = Vec::new();

    for component in path.components() {
        match component {
            Component::CurDir => (),
            Component::ParentDir => match components.last().copied() {
                Some(Component::Normal(_)) => {
                    components.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => (),
                _ => components.push(component),
            },
            component => components.push(component),
        }
    }

    components.iter().collect()
}

/// `--project-name` first, then `COMPOSE_PROJECT_NAME`, then the name of the
/// directory holding the manifest.
pub fn project_name(settings: &Settings, args: &ComposeArgs, base_dir: &Path) -> String {
    args.project_name
        .clone()
        .or_else(|| settings.project_name.clone())
        .or_else(|| {
            base_dir
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
        })
        .unwrap_or_default()
}

pub fn image_tag(project_name: &str, service_name: &str) -> String {
    format!("{}_{}:latest", project_name, service_name)
}

/// The order matters, it mirrors what `docker-compose build` hands to the
/// docker daemon.
pub fn builder_args(build: &BuildSpec, opt: &BuildOpt, tag: &str) -> Vec<String> {
    let mut args = vec![BUILD_SUBCOMMAND.to_string()];

    if !build.dockerfile.is_empty() {
        args.push("--file".into());
        args.push(build.dockerfile.clone());
    }

    for label in build.labels.iter() {
        args.push("--label".into());
        args.push(label.clone());
    }

    for build_arg in build.args.iter().chain(opt.build_args.iter()) {
        args.push("--build-arg".into());
        args.push(build_arg.clone());
    }

    args.push(build.context.clone());

    let switches = [
        (opt.compress, "--compress"),
        (opt.no_cache, "--no-cache"),
        (opt.force_remove, "--force-rm"),
        (opt.pull, "--pull"),
    ];
    for (enabled, flag) in switches.iter() {
        if *enabled {
            args.push(flag.to_string());
        }
    }

    if let Some(memory) = &opt.memory {
        args.push("--memory".into());
        args.push(memory.clone());
    }

    args.push("--tag".into());
    args.push(tag.into());

    debug!("builder arguments {:?}", args);
    args
}

fn print_status(service_name: &str, compose_file: &str) -> Result<()> {
    stdout()
        .queue(style::PrintStyledContent("Building ".cyan().bold()))?
        .queue(style::Print(format!("{} from {}\n", service_name, compose_file)))?
        .flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{arguments::route, frontends::DockerComposeFrontend};
    use std::{cell::RefCell, ffi::OsString, fs, rc::Rc};
    use tempfile::TempDir;

    const COMPOSE_FILE: &str = r#"
version: '3'
services:
  web:
    build:
      context: ./app
      dockerfile: Dockerfile.prod
      args:
        - VERSION=1.2
      labels:
        team: platform
  worker:
    build: .
  db:
    image: postgres:12
"#;

    #[derive(Clone, Default)]
    struct RecordingBackend {
        invocations: Rc<RefCell<Vec<Invocation>>>,
        exit_code: i32,
    }

    impl CommandBackend for RecordingBackend {
        fn run(&mut self, invocation: &Invocation) -> Result<i32> {
            self.invocations.borrow_mut().push(invocation.clone());
            Ok(self.exit_code)
        }
    }

    struct Fixture {
        dir: TempDir,
        backend: RecordingBackend,
    }

    impl Fixture {
        fn new() -> Fixture {
            let dir = TempDir::new().unwrap();
            let project = dir.path().join("shop");
            fs::create_dir(&project).unwrap();
            fs::write(project.join("docker-compose.yml"), COMPOSE_FILE).unwrap();

            Fixture {
                dir,
                backend: RecordingBackend::default(),
            }
        }

        fn project_dir(&self) -> PathBuf {
            self.dir.path().join("shop")
        }

        fn controller(&self, vars: Vec<(&str, &str)>) -> Controller {
            let settings = Settings::from_vars(vars, self.project_dir()).unwrap();
            Controller::init(settings, self.backend.clone(), DockerComposeFrontend::new())
        }

        fn run(&self, vars: Vec<(&str, &str)>, argv: &[&str]) -> Result<i32> {
            self.controller(vars).dispatch(route(argv))
        }

        fn invocations(&self) -> Vec<Invocation> {
            self.backend.invocations.borrow().clone()
        }
    }

    fn strings(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|token| token.to_string()).collect()
    }

    fn os_strings(tokens: &[&str]) -> Vec<OsString> {
        tokens.iter().map(OsString::from).collect()
    }

    fn config_error(err: &anyhow::Error) -> &ConfigError {
        err.downcast_ref::<ConfigError>()
            .unwrap_or_else(|| panic!("not a config error: {:?}", err))
    }

    #[test]
    fn translates_structured_build() {
        let fixture = Fixture::new();
        let code = fixture
            .run(vec![], &["docker-compose", "build", "web", "--pull", "--no-cache"])
            .unwrap();
        assert_eq!(code, 0);

        let invocations = fixture.invocations();
        assert_eq!(invocations.len(), 1);

        let invocation = &invocations[0];
        assert_eq!(invocation.program, "docker");
        assert_eq!(
            invocation.args,
            os_strings(&[
                "build",
                "--file",
                "Dockerfile.prod",
                "--label",
                "team=platform",
                "--build-arg",
                "VERSION=1.2",
                "./app",
                "--no-cache",
                "--pull",
                "--tag",
                "shop_web:latest",
            ])
        );
        assert_eq!(
            invocation.env,
            vec![("DOCKER_BUILDKIT".to_string(), "1".to_string())]
        );
        assert_eq!(invocation.current_dir, Some(fixture.project_dir()));
    }

    #[test]
    fn translates_context_only_build_with_every_switch() {
        let fixture = Fixture::new();
        fixture
            .run(
                vec![],
                &[
                    "docker-compose",
                    "build",
                    "--compress",
                    "--force-remove",
                    "--no-cache",
                    "--pull",
                    "--build-arg",
                    "EXTRA=1",
                    "-m",
                    "2g",
                    "worker",
                ],
            )
            .unwrap();

        assert_eq!(
            fixture.invocations()[0].args,
            os_strings(&[
                "build",
                "--build-arg",
                "EXTRA=1",
                ".",
                "--compress",
                "--no-cache",
                "--force-rm",
                "--pull",
                "--memory",
                "2g",
                "--tag",
                "shop_worker:latest",
            ])
        );
    }

    #[test]
    fn global_file_flag_selects_manifest_relative_to_working_dir() {
        let fixture = Fixture::new();
        let settings = Settings::from_vars(Vec::<(String, String)>::new(), fixture.dir.path().into()).unwrap();
        let mut controller =
            Controller::init(settings, fixture.backend.clone(), DockerComposeFrontend::new());

        controller
            .dispatch(route(&["docker-compose", "-f", "shop/docker-compose.yml", "build", "worker"]))
            .unwrap();

        let invocation = &fixture.invocations()[0];
        assert_eq!(invocation.current_dir, Some(fixture.project_dir()));
        assert_eq!(invocation.args.last(), Some(&OsString::from("shop_worker:latest")));
    }

    #[test]
    fn project_name_prefers_flag_then_environment() {
        let fixture = Fixture::new();
        fixture
            .run(
                vec![("COMPOSE_PROJECT_NAME", "fromenv")],
                &["docker-compose", "build", "worker"],
            )
            .unwrap();
        fixture
            .run(
                vec![("COMPOSE_PROJECT_NAME", "fromenv")],
                &["docker-compose", "-p", "fromflag", "build", "worker"],
            )
            .unwrap();

        let tags: Vec<_> = fixture
            .invocations()
            .iter()
            .map(|invocation| invocation.args.last().cloned().unwrap_or_default())
            .collect();
        assert_eq!(tags, os_strings(&["fromenv_worker:latest", "fromflag_worker:latest"]));
    }

    #[test]
    fn unknown_service_never_invokes_builder() {
        let fixture = Fixture::new();
        let err = fixture
            .run(vec![], &["docker-compose", "build", "frontend"])
            .unwrap_err();

        match config_error(&err) {
            ConfigError::UnknownService(name) => assert_eq!(name, "frontend"),
            err => panic!("unexpected error: {:?}", err),
        }
        assert!(fixture.invocations().is_empty());
    }

    #[test]
    fn several_manifests_are_ambiguous() {
        let fixture = Fixture::new();
        let err = fixture
            .run(
                vec![],
                &["docker-compose", "-f", "a.yml", "-f", "b.yml", "build", "web"],
            )
            .unwrap_err();

        match config_error(&err) {
            ConfigError::AmbiguousManifest(files) => assert_eq!(files, &strings(&["a.yml", "b.yml"])),
            err => panic!("unexpected error: {:?}", err),
        }
        assert!(fixture.invocations().is_empty());
    }

    #[test]
    fn compose_file_variable_overrides_flags() {
        let fixture = Fixture::new();
        fixture
            .run(
                vec![("COMPOSE_FILE", "docker-compose.yml")],
                &["docker-compose", "-f", "a.yml", "build", "--file", "b.yml", "worker"],
            )
            .unwrap();

        assert_eq!(fixture.invocations().len(), 1);
    }

    #[test]
    fn missing_manifest_is_an_io_error() {
        let fixture = Fixture::new();
        let err = fixture
            .run(vec![], &["docker-compose", "-f", "nope.yml", "build", "web"])
            .unwrap_err();

        assert!(matches!(config_error(&err), ConfigError::Io { .. }));
        assert!(fixture.invocations().is_empty());
    }

    #[test]
    fn service_without_build_section_is_rejected() {
        let fixture = Fixture::new();
        let err = fixture.run(vec![], &["docker-compose", "build", "db"]).unwrap_err();

        assert!(matches!(config_error(&err), ConfigError::MissingBuild(name) if name == "db"));
    }

    #[test]
    fn build_without_service_is_rejected() {
        let fixture = Fixture::new();
        let err = fixture.run(vec![], &["docker-compose", "build", "--pull"]).unwrap_err();

        assert!(matches!(config_error(&err), ConfigError::MissingService));
    }

    #[test]
    fn unknown_build_flag_is_rejected() {
        let fixture = Fixture::new();
        let err = fixture
            .run(vec![], &["docker-compose", "build", "--squash", "web"])
            .unwrap_err();

        assert!(matches!(config_error(&err), ConfigError::BuildFlags(_)));
        assert!(fixture.invocations().is_empty());
    }

    #[test]
    fn build_help_exits_cleanly_without_building() {
        let fixture = Fixture::new();
        let code = fixture
            .run(vec![], &["docker-compose", "build", "--help"])
            .unwrap();

        assert_eq!(code, 0);
        assert!(fixture.invocations().is_empty());
    }

    #[test]
    fn other_subcommands_pass_through() {
        let fixture = Fixture::new();
        let mut backend = fixture.backend.clone();
        backend.exit_code = 7;
        let settings = Settings::from_vars(
            vec![("COMPOSE_BUILDKIT_ORCHESTRATOR", "docker-compose.real")],
            fixture.project_dir(),
        )
        .unwrap();
        let mut controller = Controller::init(settings, backend, DockerComposeFrontend::new());

        let code = controller
            .dispatch(route(&["docker-compose", "-f", "x.yml", "up", "-d"]))
            .unwrap();
        assert_eq!(code, 7);

        let invocations = fixture.invocations();
        assert_eq!(
            invocations,
            vec![Invocation::new("docker-compose.real", vec!["-f", "x.yml", "up", "-d"])]
        );
    }

    #[test]
    fn builder_exit_code_is_propagated() {
        let fixture = Fixture::new();
        let mut backend = fixture.backend.clone();
        backend.exit_code = 2;
        let settings = Settings::from_vars(Vec::<(String, String)>::new(), fixture.project_dir()).unwrap();
        let mut controller = Controller::init(settings, backend, DockerComposeFrontend::new());

        let code = controller
            .dispatch(route(&["docker-compose", "build", "worker"]))
            .unwrap();
        assert_eq!(code, 2);
    }

    #[test]
    fn selects_default_compose_file() {
        let settings = Settings::from_vars(Vec::<(String, String)>::new(), PathBuf::from("/work")).unwrap();
        assert_eq!(select_compose_file(&settings, vec![]).unwrap(), "docker-compose.yml");
        assert_eq!(
            select_compose_file(&settings, strings(&["ci.yml"])).unwrap(),
            "ci.yml"
        );
    }

    #[test]
    fn manifest_location_is_normalized() {
        let location = locate_manifest(Path::new("/work/app"), "../infra/./compose.yml");

        assert_eq!(location.path, PathBuf::from("/work/infra/compose.yml"));
        assert_eq!(location.base_dir, PathBuf::from("/work/infra"));

        let location = locate_manifest(Path::new("/work/app"), "/etc/compose.yml");
        assert_eq!(location.base_dir, PathBuf::from("/etc"));
    }

    #[test]
    fn build_flags_accept_service_before_or_after_flags() {
        let before = parse_build_flags(&strings(&["web", "--pull"])).unwrap();
        let after = parse_build_flags(&strings(&["--pull", "web"])).unwrap();

        assert_eq!(before.services, strings(&["web"]));
        assert_eq!(after.services, strings(&["web"]));
        assert!(before.pull && after.pull);
    }

    #[test]
    fn force_rm_is_an_alias_of_force_remove() {
        let opt = parse_build_flags(&strings(&["--force-rm", "web"])).unwrap();
        assert!(opt.force_remove);
    }
}
