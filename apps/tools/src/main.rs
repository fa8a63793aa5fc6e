use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use server_api::issue_token;
use shared::domain::{CourseId, EnrollmentStatus, PlatformRole, UserId};
use storage::Storage;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://./data/community.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    CreateUser {
        display_name: String,
        #[arg(long, default_value = "student", value_parser = parse_role)]
        role: PlatformRole,
    },
    CreateCourse {
        created_by: i64,
        title: String,
    },
    AssignInstructor {
        course_id: i64,
        user_id: i64,
    },
    Enroll {
        course_id: i64,
        user_id: i64,
        #[arg(long, default_value = "ACTIVE", value_parser = parse_enrollment)]
        status: EnrollmentStatus,
    },
    SeedChannels {
        course_id: i64,
    },
    Suspend {
        user_id: i64,
        #[arg(long)]
        lift: bool,
    },
    /// Mints a development bearer token for an existing user.
    IssueToken {
        user_id: i64,
        #[arg(long, env = "APP__AUTH_SECRET", default_value = "dev-secret-change-me")]
        secret: String,
        #[arg(long, default_value_t = 86_400)]
        ttl_seconds: i64,
    },
}

fn parse_role(raw: &str) -> Result<PlatformRole, String> {
    PlatformRole::parse(&raw.to_ascii_lowercase())
        .ok_or_else(|| format!("unknown role '{raw}' (admin, instructor, student)"))
}

fn parse_enrollment(raw: &str) -> Result<EnrollmentStatus, String> {
    EnrollmentStatus::parse(&raw.to_ascii_uppercase()).ok_or_else(|| {
        format!("unknown enrollment status '{raw}' (pending, active, completed, cancelled, expired)")
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url)
        .await
        .with_context(|| format!("failed to open {}", cli.database_url))?;

    match cli.command {
        Command::CreateUser { display_name, role } => {
            let user_id = storage.create_user(&display_name, role).await?;
            println!("created user_id={} role={}", user_id.0, role.as_str());
        }
        Command::CreateCourse { created_by, title } => {
            let course_id = storage.create_course(&title, UserId(created_by)).await?;
            let seeded = storage.seed_default_channels(course_id).await?;
            println!("created course_id={} channels={seeded}", course_id.0);
        }
        Command::AssignInstructor { course_id, user_id } => {
            storage
                .assign_instructor(CourseId(course_id), UserId(user_id))
                .await?;
            println!("assigned user_id={user_id} to course_id={course_id}");
        }
        Command::Enroll {
            course_id,
            user_id,
            status,
        } => {
            storage
                .set_enrollment(CourseId(course_id), UserId(user_id), status)
                .await?;
            println!(
                "enrolled user_id={user_id} in course_id={course_id} status={}",
                status.as_str()
            );
        }
        Command::SeedChannels { course_id } => {
            let seeded = storage.seed_default_channels(CourseId(course_id)).await?;
            println!("seeded {seeded} channels for course_id={course_id}");
        }
        Command::Suspend { user_id, lift } => {
            if !storage.set_user_suspended(UserId(user_id), !lift).await? {
                return Err(anyhow!("no user with id {user_id}"));
            }
            println!("user_id={user_id} suspended={}", !lift);
        }
        Command::IssueToken {
            user_id,
            secret,
            ttl_seconds,
        } => {
            let user = storage
                .user(UserId(user_id))
                .await?
                .ok_or_else(|| anyhow!("no user with id {user_id}"))?;
            let token = issue_token(&secret, user.user_id, user.role, ttl_seconds)?;
            println!("{token}");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parsers_accept_any_case() {
        assert_eq!(parse_role("Instructor"), Ok(PlatformRole::Instructor));
        assert_eq!(parse_enrollment("completed"), Ok(EnrollmentStatus::Completed));
        assert!(parse_role("teacher").is_err());
    }

    #[test]
    fn cli_parses_enroll_defaults() {
        let cli = Cli::try_parse_from(["tools", "enroll", "3", "9"]).expect("parse");
        match cli.command {
            Command::Enroll {
                course_id,
                user_id,
                status,
            } => {
                assert_eq!((course_id, user_id), (3, 9));
                assert_eq!(status, EnrollmentStatus::Active);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
