use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use hadir_client::{
    AcademicYearInput, ApiClient, AttendanceSubmission, HistoryQuery, LeaveAttachment, LeaveInput, LeaveStatus,
    LeaveVerdict, MajorInput, Session, SubjectInput, TeacherInput,
};
use std::path::PathBuf;

mod enroll;

#[derive(Parser)]
#[command(name = "hadir", version, about = "Si-Hadir attendance admin CLI")]
struct Cli {
    /// Backend base URL
    #[arg(long, global = true, env = "HADIR_API_URL", default_value = hadir_client::DEFAULT_API_URL)]
    api_url: String,

    /// Session file (defaults to $XDG_DATA_HOME/hadir/session.json)
    #[arg(long, global = true, env = "HADIR_SESSION_PATH")]
    session: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in as an administrator
    Login {
        #[arg(short, long)]
        email: String,
        #[arg(short, long, env = "HADIR_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Sign out and forget the stored session
    Logout,
    /// Show the signed-in administrator
    Whoami,
    /// Manage teachers
    #[command(subcommand)]
    Teachers(TeacherCommand),
    /// Manage academic years
    #[command(subcommand)]
    AcademicYears(AcademicYearCommand),
    /// Manage majors
    #[command(subcommand)]
    Majors(MajorCommand),
    /// Manage subjects
    #[command(subcommand)]
    Subjects(SubjectCommand),
    /// Review and file leave requests
    #[command(subcommand)]
    Leaves(LeaveCommand),
    /// Record attendance by card or manually
    #[command(subcommand)]
    Attend(AttendCommand),
    /// Browse the attendance log
    History {
        #[arg(short, long)]
        search: Option<String>,
        /// Day to show (YYYY-MM-DD)
        #[arg(short, long)]
        date: Option<NaiveDate>,
        #[arg(short, long)]
        page: Option<u32>,
    },
    /// List V4L2 capture devices
    Devices,
}

#[derive(Args)]
struct TeacherFields {
    #[arg(long)]
    name: String,
    #[arg(long)]
    email: String,
    #[arg(long)]
    nip: Option<String>,
    /// L or P
    #[arg(long, default_value = "L", value_parser = ["L", "P"])]
    gender: String,
}

impl From<TeacherFields> for TeacherInput {
    fn from(f: TeacherFields) -> Self {
        TeacherInput {
            name: f.name,
            nip: f.nip.filter(|n| !n.trim().is_empty()),
            email: f.email,
            jenis_kelamin: f.gender,
        }
    }
}

#[derive(Subcommand)]
enum TeacherCommand {
    List {
        #[arg(long, default_value_t = 100)]
        per_page: u32,
    },
    Add(TeacherFields),
    Edit {
        id: u64,
        #[command(flatten)]
        fields: TeacherFields,
    },
    Delete {
        id: u64,
    },
    /// Link an RFID card to a teacher
    Rfid {
        id: u64,
        uid: String,
    },
    /// Capture a face from the camera and store it for face attendance
    EnrollFace {
        id: u64,
        #[arg(long, env = "HADIR_CAMERA_DEVICE", default_value = "/dev/video0")]
        device: String,
        #[arg(long, default_value_t = 640)]
        width: u32,
        #[arg(long, default_value_t = 480)]
        height: u32,
        #[arg(long, env = "HADIR_MODEL_DIR")]
        model_dir: Option<PathBuf>,
        /// Frames to try before giving up
        #[arg(long, default_value_t = 30)]
        attempts: usize,
    },
}

#[derive(Subcommand)]
enum AcademicYearCommand {
    List,
    Add(AcademicYearFields),
    Edit {
        id: u64,
        #[command(flatten)]
        fields: AcademicYearFields,
    },
    Delete {
        id: u64,
    },
}

#[derive(Args)]
struct AcademicYearFields {
    #[arg(long)]
    name: String,
    /// e.g. 2024/2025
    #[arg(long)]
    years: String,
    #[arg(long, default_value = "ganjil", value_parser = ["ganjil", "genap"])]
    semester: String,
    #[arg(long)]
    active: bool,
}

impl From<AcademicYearFields> for AcademicYearInput {
    fn from(f: AcademicYearFields) -> Self {
        AcademicYearInput {
            name: f.name,
            years: f.years,
            semester: f.semester,
            is_active: f.active,
        }
    }
}

#[derive(Subcommand)]
enum MajorCommand {
    List,
    Add(MajorFields),
    Edit {
        id: u64,
        #[command(flatten)]
        fields: MajorFields,
    },
    Delete {
        id: u64,
    },
}

#[derive(Args)]
struct MajorFields {
    #[arg(long)]
    code: String,
    #[arg(long)]
    name: String,
    /// Teacher id of the head of program
    #[arg(long)]
    head: Option<u64>,
}

impl From<MajorFields> for MajorInput {
    fn from(f: MajorFields) -> Self {
        MajorInput {
            code: f.code,
            name: f.name,
            head_of_program_id: f.head,
        }
    }
}

#[derive(Subcommand)]
enum SubjectCommand {
    List,
    Add {
        #[arg(long)]
        name: String,
    },
    Edit {
        id: u64,
        #[arg(long)]
        name: String,
    },
    Delete {
        id: u64,
    },
}

#[derive(Subcommand)]
enum LeaveCommand {
    List {
        /// pending, approved or rejected
        #[arg(long)]
        status: Option<LeaveStatus>,
    },
    Create {
        #[arg(long)]
        teacher: u64,
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
        #[arg(long = "type", default_value = "sakit", value_parser = ["sakit", "izin"])]
        kind: String,
        #[arg(long)]
        reason: String,
        /// Supporting document to attach
        #[arg(long)]
        file: Option<PathBuf>,
    },
    Approve {
        id: u64,
        #[arg(long)]
        note: Option<String>,
    },
    Reject {
        id: u64,
        #[arg(long)]
        note: Option<String>,
    },
}

#[derive(Subcommand)]
enum AttendCommand {
    Rfid {
        uid: String,
    },
    Manual {
        teacher: u64,
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let session = Session::persistent(cli.session.unwrap_or_else(Session::default_path));
    session.on_forced_logout(|| eprintln!("Session expired. Run `hadir login` again."));
    let client = ApiClient::new(cli.api_url, session)?;

    match cli.command {
        Commands::Login { email, password } => {
            let user = client.login(&email, &password).await?;
            println!("Signed in as {}", user.name.as_deref().unwrap_or(&email));
        }
        Commands::Logout => {
            client.logout().await?;
            println!("Signed out");
        }
        Commands::Whoami => match client.session().user() {
            Some(user) if client.session().is_signed_in() => println!(
                "{} <{}>",
                user.name.as_deref().unwrap_or("-"),
                user.email.as_deref().unwrap_or("-")
            ),
            _ if client.session().is_signed_in() => println!("Signed in"),
            _ => println!("Not signed in"),
        },
        Commands::Teachers(cmd) => teachers(&client, cmd).await?,
        Commands::AcademicYears(cmd) => academic_years(&client, cmd).await?,
        Commands::Majors(cmd) => majors(&client, cmd).await?,
        Commands::Subjects(cmd) => subjects(&client, cmd).await?,
        Commands::Leaves(cmd) => leaves(&client, cmd).await?,
        Commands::Attend(cmd) => attend(&client, cmd).await?,
        Commands::History { search, date, page } => {
            let page = client.attendance_history(&HistoryQuery { search, date, page }).await?;
            if page.data.is_empty() {
                println!("No attendance records");
            }
            for log in &page.data {
                let teacher = log.teacher.clone().unwrap_or_default();
                println!(
                    "{:<12} {:<28} {:<8} {:<10} {}",
                    log.parsed_date().map(|d| d.to_string()).unwrap_or_else(|| log.date.clone()),
                    teacher.name.as_deref().unwrap_or("-"),
                    log.method,
                    log.check_in.as_deref().unwrap_or("-"),
                    log.status_label()
                );
            }
            println!("Page {} of {}", page.current_page, page.last_page);
        }
        Commands::Devices => {
            let devices = hadir_hw::Camera::list_devices();
            if devices.is_empty() {
                println!("No capture devices found");
            }
            for d in devices {
                println!("{:<14} {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
        }
    }

    Ok(())
}

async fn teachers(client: &ApiClient, cmd: TeacherCommand) -> Result<()> {
    match cmd {
        TeacherCommand::List { per_page } => {
            for t in client.list_teachers(per_page).await? {
                println!(
                    "{:>5}  {:<28} {:<20} {:<30} rfid:{:<12} face:{}",
                    t.id,
                    t.name,
                    t.nip.as_deref().unwrap_or("-"),
                    t.email.as_deref().unwrap_or("-"),
                    t.rfid_uid.as_deref().unwrap_or("-"),
                    if t.has_face() { "yes" } else { "no" }
                );
            }
        }
        TeacherCommand::Add(fields) => {
            client.create_teacher(&fields.into()).await?;
            println!("Teacher added");
        }
        TeacherCommand::Edit { id, fields } => {
            client.update_teacher(id, &fields.into()).await?;
            println!("Teacher {id} updated");
        }
        TeacherCommand::Delete { id } => {
            client.delete_teacher(id).await?;
            println!("Teacher {id} deleted");
        }
        TeacherCommand::Rfid { id, uid } => {
            if uid.trim().is_empty() {
                bail!("card UID is empty");
            }
            client.assign_rfid(id, &uid).await?;
            println!("Card linked to teacher {id}");
        }
        TeacherCommand::EnrollFace {
            id,
            device,
            width,
            height,
            model_dir,
            attempts,
        } => {
            let model_dir = model_dir.unwrap_or_else(hadir_models::default_model_dir);
            println!("Look at the camera...");
            let capture = tokio::task::spawn_blocking(move || capture_for_enrollment(&device, width, height, model_dir, attempts))
                .await
                .context("enrollment task panicked")??;
            client.enroll_face(id, &capture.embedding, &capture.photo).await?;
            println!(
                "Face enrolled for teacher {id} (confidence {:.2}, {} dims)",
                capture.confidence,
                capture.embedding.len()
            );
        }
    }
    Ok(())
}

const ENROLL_WARMUP_FRAMES: usize = 4;
const ENROLL_SNAPSHOT_QUALITY: u8 = 85;

fn capture_for_enrollment(
    device: &str,
    width: u32,
    height: u32,
    model_dir: PathBuf,
    attempts: usize,
) -> Result<enroll::EnrollCapture> {
    let mut loader = hadir_core::ModelLoader::new(hadir_models::OnnxModels::new(model_dir));
    loader.load(|step| eprintln!("  {step}"))?;
    let pipeline = loader.pipeline_mut().context("face models unavailable")?;

    let camera = hadir_hw::Camera::open(device, width, height)?;
    for _ in 0..ENROLL_WARMUP_FRAMES {
        let _ = camera.capture_frame();
    }
    Ok(enroll::capture_face(
        pipeline,
        || camera.capture_frame(),
        attempts,
        ENROLL_SNAPSHOT_QUALITY,
    )?)
}

async fn academic_years(client: &ApiClient, cmd: AcademicYearCommand) -> Result<()> {
    match cmd {
        AcademicYearCommand::List => {
            for y in client.list_academic_years().await? {
                println!(
                    "{:>4}  {:<30} {:<10} {:<7} {}",
                    y.id,
                    y.name,
                    y.years.as_deref().unwrap_or("-"),
                    y.semester.as_deref().unwrap_or("-"),
                    if y.is_active { "active" } else { "" }
                );
            }
        }
        AcademicYearCommand::Add(fields) => client.create_academic_year(&fields.into()).await?,
        AcademicYearCommand::Edit { id, fields } => client.update_academic_year(id, &fields.into()).await?,
        AcademicYearCommand::Delete { id } => client.delete_academic_year(id).await?,
    }
    Ok(())
}

async fn majors(client: &ApiClient, cmd: MajorCommand) -> Result<()> {
    match cmd {
        MajorCommand::List => {
            for m in client.list_majors().await? {
                let head = m.head_of_program_id.map(|h| h.to_string()).unwrap_or_else(|| "-".into());
                println!("{:>4}  {:<8} {:<36} head:{}", m.id, m.code, m.name, head);
            }
        }
        MajorCommand::Add(fields) => client.create_major(&fields.into()).await?,
        MajorCommand::Edit { id, fields } => client.update_major(id, &fields.into()).await?,
        MajorCommand::Delete { id } => client.delete_major(id).await?,
    }
    Ok(())
}

async fn subjects(client: &ApiClient, cmd: SubjectCommand) -> Result<()> {
    match cmd {
        SubjectCommand::List => {
            for s in client.list_subjects().await? {
                println!("{:>4}  {}", s.id, s.name);
            }
        }
        SubjectCommand::Add { name } => client.create_subject(&SubjectInput { name }).await?,
        SubjectCommand::Edit { id, name } => client.update_subject(id, &SubjectInput { name }).await?,
        SubjectCommand::Delete { id } => client.delete_subject(id).await?,
    }
    Ok(())
}

async fn leaves(client: &ApiClient, cmd: LeaveCommand) -> Result<()> {
    match cmd {
        LeaveCommand::List { status } => {
            let leaves = client.list_leaves(status).await?;
            if leaves.is_empty() {
                println!("No leave requests");
            }
            for l in leaves {
                let teacher = l.teacher.clone().unwrap_or_default();
                println!(
                    "{:>4}  {:<28} {} → {}  {:<6} {:<9} {}",
                    l.id,
                    teacher.name.as_deref().unwrap_or("(deleted teacher)"),
                    l.start_date,
                    l.end_date,
                    l.kind,
                    l.status.as_str(),
                    l.reason.as_deref().unwrap_or("")
                );
            }
        }
        LeaveCommand::Create {
            teacher,
            start,
            end,
            kind,
            reason,
            file,
        } => {
            let attachment = file.as_deref().map(LeaveAttachment::from_path).transpose()?;
            let input = LeaveInput {
                teacher_id: teacher,
                start_date: start,
                end_date: end,
                kind,
                reason,
            };
            client.create_leave(&input, attachment).await?;
            println!("Leave request filed");
        }
        LeaveCommand::Approve { id, note } => {
            client.verify_leave(id, LeaveVerdict::Approve, note.as_deref()).await?;
            println!("Leave {id} approved");
        }
        LeaveCommand::Reject { id, note } => {
            client.verify_leave(id, LeaveVerdict::Reject, note.as_deref()).await?;
            println!("Leave {id} rejected");
        }
    }
    Ok(())
}

async fn attend(client: &ApiClient, cmd: AttendCommand) -> Result<()> {
    let submission = match cmd {
        AttendCommand::Rfid { uid } => {
            let uid = uid.trim();
            if uid.is_empty() {
                bail!("card UID is empty");
            }
            AttendanceSubmission::rfid(uid)
        }
        AttendCommand::Manual { teacher, lat, lon } => AttendanceSubmission::manual(teacher, lat, lon),
    };
    let receipt = client.submit_attendance(&submission).await?;
    let message = receipt.message.unwrap_or_default();
    if receipt.success {
        println!("OK: {message}");
    } else {
        println!("Already recorded: {message}");
    }
    Ok(())
}
