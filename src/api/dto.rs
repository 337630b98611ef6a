//! Wire types of the remote course-data provider. Only the fields the bot
//! consumes are modeled; everything else in the receipts is ignored.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct LoginReceipt {
    pub status: i64,
    pub data: LoginData,
}

#[derive(Debug, Deserialize)]
pub struct LoginData {
    pub student: StudentReceipt,
}

#[derive(Debug, Deserialize)]
pub struct StudentReceipt {
    #[serde(rename = "studentId")]
    pub student_id: i64,
    #[serde(rename = "nickName")]
    pub nick_name: String,
    #[serde(rename = "schoolId")]
    pub school_id: i64,
    #[serde(rename = "schoolName")]
    pub school_name: String,
}

/// Failed logins come back with a different body shape.
#[derive(Debug, Deserialize)]
pub struct ErrorLoginReceipt {
    pub data: ErrorLoginData,
}

#[derive(Debug, Deserialize)]
pub struct ErrorLoginData {
    #[serde(rename = "errorStr")]
    pub error_str: String,
}

#[derive(Debug, Deserialize)]
pub struct CourseReceipt {
    pub status: i64,
    pub data: CourseData,
}

#[derive(Debug, Deserialize)]
pub struct CourseData {
    #[serde(rename = "lessonList", default)]
    pub lesson_list: Vec<LessonReceipt>,
}

#[derive(Debug, Deserialize)]
pub struct LessonReceipt {
    #[serde(rename = "courseId")]
    pub course_id: i64,
    pub name: String,
    #[serde(default)]
    pub teacher: String,
    pub locale: String,
    pub day: i64,
    pub sectionstart: i64,
    pub sectionend: i64,
    /// Space-separated week numbers the meeting recurs on.
    #[serde(rename = "smartPeriod")]
    pub smart_period: String,
}

#[derive(Debug, Deserialize)]
pub struct TermListReceipt {
    pub status: i64,
    #[serde(rename = "myTermList", default)]
    pub my_term_list: Vec<TermReceipt>,
}

#[derive(Debug, Deserialize)]
pub struct TermReceipt {
    #[serde(rename = "beginYear")]
    pub begin_year: i64,
    pub term: i64,
    #[serde(rename = "courseTimeList")]
    pub course_time_list: CourseTimeList,
}

#[derive(Debug, Deserialize)]
pub struct CourseTimeList {
    #[serde(rename = "courseTimeBO", default)]
    pub course_time_bo: Vec<CourseTime>,
}

/// Period times come as bare `HHMM` strings, sometimes empty.
#[derive(Debug, Deserialize)]
pub struct CourseTime {
    #[serde(rename = "beginTimeStr", default)]
    pub begin_time_str: String,
    #[serde(rename = "endTimeStr", default)]
    pub end_time_str: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_receipt_parses() {
        let raw = r#"{
            "status": 1,
            "data": {
                "student": {
                    "studentId": 12345,
                    "nickName": "sam",
                    "schoolId": 42,
                    "schoolName": "Test University",
                    "extraneous": true
                }
            }
        }"#;
        let receipt: LoginReceipt = serde_json::from_str(raw).unwrap();
        assert_eq!(receipt.data.student.school_id, 42);
    }

    #[test]
    fn test_lesson_defaults_missing_teacher() {
        let raw = r#"{
            "courseId": 9, "name": "algebra", "locale": "room 1",
            "day": 3, "sectionstart": 1, "sectionend": 2, "smartPeriod": "1 2 3"
        }"#;
        let lesson: LessonReceipt = serde_json::from_str(raw).unwrap();
        assert_eq!(lesson.teacher, "");
        assert_eq!(lesson.smart_period, "1 2 3");
    }
}
