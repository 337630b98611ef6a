//! # Remote Course-Data Provider
//!
//! The [`CourseProvider`] trait is everything the core knows about the
//! remote timetable service: log in, fetch the course list, fetch the
//! term's bell schedule. [`SuperClassClient`] implements it over HTTP;
//! tests substitute a canned provider.

pub mod dto;

use async_trait::async_trait;
use log::debug;
use regex::Regex;
use reqwest::header::SET_COOKIE;

/// Session cookies returned by a successful login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginSession {
    pub jsession_id: String,
    pub server_id: String,
}

/// The student profile a login resolves to.
#[derive(Debug, Clone)]
pub struct StudentInfo {
    pub student_id: i64,
    pub name: String,
    pub school_id: i64,
    pub school_name: String,
}

/// One course entry as the provider reports it.
#[derive(Debug, Clone)]
pub struct RemoteCourse {
    pub course_id: i64,
    pub name: String,
    pub teacher: String,
    pub locale: String,
    pub day_of_week: i64,
    pub section_start: i64,
    pub section_end: i64,
    /// Space-separated week numbers.
    pub weeks: String,
}

/// Failure taxonomy of the provider boundary. Handlers translate these into
/// user-facing messages; none of them crash the queue worker.
#[derive(Debug)]
pub enum ProviderError {
    /// Bad credentials or a rejection the provider explains in its receipt.
    Auth(String),
    /// Transport-level failure (connect, timeout, non-2xx).
    Network(String),
    /// A response we could not make sense of.
    Malformed(String),
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderError::Auth(reason) => write!(f, "login rejected: {}", reason),
            ProviderError::Network(reason) => write!(f, "network error: {}", reason),
            ProviderError::Malformed(reason) => write!(f, "malformed response: {}", reason),
        }
    }
}

impl std::error::Error for ProviderError {}

#[async_trait]
pub trait CourseProvider: Send + Sync {
    /// Authenticate and return the session plus the student profile.
    async fn login(
        &self,
        account: &str,
        password: &str,
    ) -> Result<(LoginSession, StudentInfo), ProviderError>;

    /// Fetch the course list of a term.
    async fn fetch_courses(
        &self,
        session: &LoginSession,
        semester: i64,
        begin_year: i64,
    ) -> Result<Vec<RemoteCourse>, ProviderError>;

    /// Fetch the term's bell schedule as the canonical pipe-delimited
    /// `HH:MM-HH:MM|...` string.
    async fn fetch_term_schedule(
        &self,
        session: &LoginSession,
        semester: i64,
        begin_year: i64,
    ) -> Result<String, ProviderError>;
}

/// HTTP client for the SuperClass education system.
pub struct SuperClassClient {
    http: reqwest::Client,
    base_url: String,
    jsession_re: Regex,
    server_re: Regex,
}

impl SuperClassClient {
    pub fn new(base_url: &str) -> Self {
        SuperClassClient {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            jsession_re: Regex::new(r"JSESSIONID=([^;]+)").expect("hard-coded regex"),
            server_re: Regex::new(r"SERVERID=([^;]+)").expect("hard-coded regex"),
        }
    }

    fn cookie_header(session: &LoginSession) -> String {
        format!(
            "JSESSIONID={}; SERVERID={}",
            session.jsession_id, session.server_id
        )
    }
}

#[async_trait]
impl CourseProvider for SuperClassClient {
    async fn login(
        &self,
        account: &str,
        password: &str,
    ) -> Result<(LoginSession, StudentInfo), ProviderError> {
        let response = self
            .http
            .post(format!("{}/V2/StudentSkip/loginCheckV4.action", self.base_url))
            .form(&[
                ("account", account),
                ("password", password),
                ("platform", "1"),
                ("updateInfo", "false"),
            ])
            .send()
            .await
            .map_err(|err| ProviderError::Network(err.to_string()))?;

        let mut session = LoginSession {
            jsession_id: String::new(),
            server_id: String::new(),
        };
        for value in response.headers().get_all(SET_COOKIE) {
            let raw = value.to_str().unwrap_or("");
            if let Some(captures) = self.jsession_re.captures(raw) {
                session.jsession_id = captures[1].to_string();
            }
            if let Some(captures) = self.server_re.captures(raw) {
                session.server_id = captures[1].to_string();
            }
        }

        let body = response
            .text()
            .await
            .map_err(|err| ProviderError::Network(err.to_string()))?;

        match serde_json::from_str::<dto::LoginReceipt>(&body) {
            Ok(receipt) if receipt.status == 1 => {
                debug!("Provider login ok for account {}.", account);
                let student = receipt.data.student;
                Ok((
                    session,
                    StudentInfo {
                        student_id: student.student_id,
                        name: student.nick_name,
                        school_id: student.school_id,
                        school_name: student.school_name,
                    },
                ))
            }
            _ => match serde_json::from_str::<dto::ErrorLoginReceipt>(&body) {
                Ok(receipt) => Err(ProviderError::Auth(receipt.data.error_str)),
                Err(err) => Err(ProviderError::Malformed(err.to_string())),
            },
        }
    }

    async fn fetch_courses(
        &self,
        session: &LoginSession,
        semester: i64,
        begin_year: i64,
    ) -> Result<Vec<RemoteCourse>, ProviderError> {
        let response = self
            .http
            .post(format!(
                "{}/V2/Course/getCourseTableFromServer.action",
                self.base_url
            ))
            .header("Cookie", Self::cookie_header(session))
            .form(&[
                ("beginYear", begin_year.to_string()),
                ("term", semester.to_string()),
            ])
            .send()
            .await
            .map_err(|err| ProviderError::Network(err.to_string()))?;

        let receipt: dto::CourseReceipt = response
            .json()
            .await
            .map_err(|err| ProviderError::Malformed(err.to_string()))?;
        if receipt.status != 1 {
            return Err(ProviderError::Auth(format!(
                "course fetch rejected with status {}",
                receipt.status
            )));
        }

        Ok(receipt
            .data
            .lesson_list
            .into_iter()
            .map(|lesson| RemoteCourse {
                course_id: lesson.course_id,
                name: lesson.name,
                teacher: lesson.teacher,
                locale: lesson.locale,
                day_of_week: lesson.day,
                section_start: lesson.sectionstart,
                section_end: lesson.sectionend,
                weeks: lesson.smart_period,
            })
            .collect())
    }

    async fn fetch_term_schedule(
        &self,
        session: &LoginSession,
        semester: i64,
        begin_year: i64,
    ) -> Result<String, ProviderError> {
        let response = self
            .http
            .post(format!("{}/V2/StudentSkip/termList.action", self.base_url))
            .header("Cookie", Self::cookie_header(session))
            .send()
            .await
            .map_err(|err| ProviderError::Network(err.to_string()))?;

        let receipt: dto::TermListReceipt = response
            .json()
            .await
            .map_err(|err| ProviderError::Malformed(err.to_string()))?;

        let term = receipt
            .my_term_list
            .into_iter()
            .find(|term| term.begin_year == begin_year && term.term == semester)
            .ok_or_else(|| {
                ProviderError::Malformed(format!(
                    "no term entry for {}:{}",
                    begin_year, semester
                ))
            })?;

        encode_term_schedule(&term)
    }
}

/// Join a term's period times into the canonical pipe-delimited string.
/// Empty period entries (the provider pads its lists) are skipped.
fn encode_term_schedule(term: &dto::TermReceipt) -> Result<String, ProviderError> {
    let mut segments = Vec::new();
    for time in &term.course_time_list.course_time_bo {
        if time.begin_time_str.is_empty() {
            continue;
        }
        segments.push(format!(
            "{}-{}",
            insert_colon(&time.begin_time_str)?,
            insert_colon(&time.end_time_str)?
        ));
    }
    Ok(segments.join("|"))
}

/// `"0810"` -> `"08:10"`.
fn insert_colon(raw: &str) -> Result<String, ProviderError> {
    if raw.len() != 4 || !raw.chars().all(|c| c.is_ascii_digit()) {
        return Err(ProviderError::Malformed(format!(
            "bad period time {:?}",
            raw
        )));
    }
    Ok(format!("{}:{}", &raw[..2], &raw[2..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_term_schedule_skips_blank_slots() {
        let term = dto::TermReceipt {
            begin_year: 2025,
            term: 1,
            course_time_list: dto::CourseTimeList {
                course_time_bo: vec![
                    dto::CourseTime {
                        begin_time_str: "0810".to_string(),
                        end_time_str: "0855".to_string(),
                    },
                    dto::CourseTime {
                        begin_time_str: String::new(),
                        end_time_str: String::new(),
                    },
                    dto::CourseTime {
                        begin_time_str: "0905".to_string(),
                        end_time_str: "0950".to_string(),
                    },
                ],
            },
        };
        assert_eq!(
            encode_term_schedule(&term).unwrap(),
            "08:10-08:55|09:05-09:50"
        );
    }

    #[test]
    fn test_insert_colon_rejects_garbage() {
        assert!(insert_colon("8:10").is_err());
        assert!(insert_colon("081O").is_err());
        assert_eq!(insert_colon("0810").unwrap(), "08:10");
    }

    #[test]
    fn test_provider_error_display() {
        let err = ProviderError::Auth("wrong password".to_string());
        assert_eq!(err.to_string(), "login rejected: wrong password");
    }
}
