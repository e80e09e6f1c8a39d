//! Spreadsheet serialization of a [`MonthlyReport`].

use chrono::NaiveDate;
use rust_xlsxwriter::{Color, Format, FormatBorder, Workbook, Worksheet};

use super::{MonthKey, MonthlyReport};
use crate::errors::AppError;

/// Download name for a month's export.
pub fn export_file_name(month: MonthKey) -> String {
    format!("SiteScribe_Attendance_{}.xlsx", month)
}

/// Render `report` as an xlsx workbook held in memory.
pub fn write_workbook(report: &MonthlyReport) -> Result<Vec<u8>, AppError> {
    let mut workbook = Workbook::new();

    let header_format = Format::new()
        .set_bold()
        .set_background_color(Color::RGB(0xD9D9D9))
        .set_border(FormatBorder::Thin);
    let total_format = Format::new().set_bold().set_border(FormatBorder::Thin);

    let attendance = workbook.add_worksheet();
    write_attendance_sheet(attendance, report, &header_format, &total_format)?;

    let allowance = workbook.add_worksheet();
    write_allowance_sheet(allowance, report, &header_format, &total_format)?;

    let buffer = workbook.save_to_buffer()?;
    tracing::debug!(month = %report.month, bytes = buffer.len(), "Workbook written");
    Ok(buffer)
}

/// Sheet column of the employee at `index`, leaving column 0 for labels.
fn column_at(index: usize) -> Result<u16, AppError> {
    u16::try_from(index + 1).map_err(|_| {
        AppError::Export(format!("Too many employees for one worksheet ({})", index + 1))
    })
}

/// Sheet row of the item at `index`, leaving row 0 for the header.
fn row_at(index: usize) -> Result<u32, AppError> {
    u32::try_from(index + 1)
        .map_err(|_| AppError::Export(format!("Too many rows for one worksheet ({})", index + 1)))
}

/// Column width that fits `text`, within 10..=40 characters.
fn width_for(text: &str) -> f64 {
    (text.chars().count() + 2).clamp(10, 40) as f64
}

fn write_attendance_sheet(
    worksheet: &mut Worksheet,
    report: &MonthlyReport,
    header_format: &Format,
    total_format: &Format,
) -> Result<(), AppError> {
    worksheet.set_name("Attendance")?;

    worksheet.write_string_with_format(0, 0, "Date", header_format)?;
    worksheet.set_column_width(0, width_for("Total Allowance"))?;
    for (i, employee) in report.employees.iter().enumerate() {
        let col = column_at(i)?;
        worksheet.write_string_with_format(0, col, &employee.name, header_format)?;
        worksheet.set_column_width(col, width_for(&employee.name))?;
    }

    for (i, day) in report.days.iter().enumerate() {
        let row = row_at(i)?;
        let label = NaiveDate::parse_from_str(day, "%Y-%m-%d")
            .map(|d| d.format("%d-%b-%Y").to_string())
            .unwrap_or_else(|_| day.clone());
        worksheet.write_string(row, 0, label)?;
        for (j, employee) in report.employees.iter().enumerate() {
            let code = employee.marks.get(i).map(|m| m.code()).unwrap_or("-");
            worksheet.write_string(row, column_at(j)?, code)?;
        }
    }

    let totals = row_at(report.days.len())?;
    worksheet.write_string_with_format(totals, 0, "Total Present", total_format)?;
    worksheet.write_string_with_format(totals + 1, 0, "Total Absent", total_format)?;
    worksheet.write_string_with_format(totals + 2, 0, "Total Allowance", total_format)?;
    for (j, employee) in report.employees.iter().enumerate() {
        let col = column_at(j)?;
        worksheet.write_number_with_format(totals, col, employee.present, total_format)?;
        worksheet.write_number_with_format(totals + 1, col, employee.absent, total_format)?;
        worksheet.write_number_with_format(
            totals + 2,
            col,
            employee.allowance as f64,
            total_format,
        )?;
    }

    worksheet.set_freeze_panes(1, 1)?;
    Ok(())
}

fn write_allowance_sheet(
    worksheet: &mut Worksheet,
    report: &MonthlyReport,
    header_format: &Format,
    total_format: &Format,
) -> Result<(), AppError> {
    worksheet.set_name("Allowance")?;

    let headers = ["Employee", "Present Days", "Half Days", "Absent Days", "Allowance (LKR)"];
    for (col, header) in (0u16..).zip(headers) {
        worksheet.write_string_with_format(0, col, header, header_format)?;
        worksheet.set_column_width(col, width_for(header))?;
    }
    let longest_name = report
        .employees
        .iter()
        .map(|e| e.name.as_str())
        .max_by_key(|name| name.chars().count())
        .unwrap_or("Employee");
    worksheet.set_column_width(0, width_for(longest_name))?;

    let days_format = Format::new().set_num_format("0.0");
    for (i, employee) in report.employees.iter().enumerate() {
        let row = row_at(i)?;
        worksheet.write_string(row, 0, &employee.name)?;
        worksheet.write_number_with_format(row, 1, employee.present, &days_format)?;
        worksheet.write_number(row, 2, employee.half_days)?;
        worksheet.write_number(row, 3, employee.absent)?;
        worksheet.write_number(row, 4, employee.allowance as f64)?;
    }

    let total_row = row_at(report.employees.len())?;
    worksheet.write_string_with_format(total_row, 0, "Total", total_format)?;
    worksheet.write_number_with_format(
        total_row,
        4,
        report.total_allowance as f64,
        total_format,
    )?;

    worksheet.set_freeze_panes(1, 0)?;
    Ok(())
}
