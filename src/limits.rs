use anyhow::{anyhow, Result};

/// Current soft limit on open file descriptors
#[cfg(unix)]
pub fn nofile_limit() -> Result<u64> {
	let mut limit = libc::rlimit { rlim_cur: 0, rlim_max: 0 };
	let rc = unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) };
	if rc != 0 {
		return Err(anyhow!("getrlimit failed: {}", std::io::Error::last_os_error()));
	}
	Ok(limit.rlim_cur as u64)
}

/// Refuse a parallelism the process cannot open sockets for.
///
/// Every worker may hold a socket per in-flight query, so running past the
/// soft `nofile` limit ends in EMFILE errors mid-run.
#[cfg(unix)]
pub fn check_ulimit(parallel: usize) -> Result<()> {
	let limit = nofile_limit()?;
	check_against(parallel, limit)
}

#[cfg(not(unix))]
pub fn check_ulimit(_parallel: usize) -> Result<()> {
	Ok(())
}

fn check_against(parallel: usize, limit: u64) -> Result<()> {
	if parallel as u64 > limit {
		return Err(anyhow!(
			"current ulimit for \"nofile\" lower than requested --parallel: {} vs {}",
			limit, parallel,
		));
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_check_against() {
		assert!(check_against(5, 1024).is_ok());
		assert!(check_against(1024, 1024).is_ok());
		let err = check_against(4096, 1024).unwrap_err().to_string();
		assert!(err.contains("1024 vs 4096"));
	}

	#[cfg(unix)]
	#[test]
	fn test_nofile_limit_readable() {
		assert!(nofile_limit().unwrap() > 0);
	}
}
