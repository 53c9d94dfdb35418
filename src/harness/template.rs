/// Harness template wrapping untrusted user code
///
/// The harness is text, not a library call: user code must execute inside
/// a freshly spawned interpreter with no ambient access to this process.
/// Whatever happens inside the child, the final act is printing one
/// sentinel-prefixed JSON line; the parent has no other way to observe
/// the outcome, so no internal failure may suppress that emission.
use super::SENTINEL;

/// Synthetic filename the user source is compiled under. Traceback lines
/// referencing it are matched back to exact user line numbers.
pub const USER_CODE_FILENAME: &str = "USER_CODE.py";

const USER_CODE_SLOT: &str = "@USER_CODE_LITERAL@";
const FILENAME_SLOT: &str = "@USER_CODE_FILENAME@";
const SENTINEL_SLOT: &str = "@SENTINEL@";

const HARNESS_TEMPLATE: &str = r#"# ===== pipebox pandapipes harness =====
import os, json, pathlib, traceback, re

# Redirect plotting before anything can initialize a GUI toolkit.
os.environ["MPLBACKEND"] = "Agg"
try:
    _mpl = pathlib.Path.cwd() / "mplconfig"
    _mpl.mkdir(parents=True, exist_ok=True)
    os.environ["MPLCONFIGDIR"] = str(_mpl)
except Exception:
    pass

USER_CODE = @USER_CODE_LITERAL@
user_code_error = False
user_error = None
user_traceback = None
user_error_line = None

def _extract_user_line(tb, fname="@USER_CODE_FILENAME@"):
    try:
        last = None
        for ln in tb.splitlines():
            m = re.search(r'File "([^"]+)", line (\d+)', ln)
            if m and fname in m.group(1):
                last = int(m.group(2))
        return last
    except Exception:
        return None

try:
    exec(compile(USER_CODE, "@USER_CODE_FILENAME@", "exec"), globals())
    if 'net' not in globals():
        raise NameError("variable 'net' is not defined in user code")
except Exception as e:
    user_code_error = True
    user_error = f"{type(e).__name__}: {e}"
    user_traceback = traceback.format_exc()
    user_error_line = _extract_user_line(user_traceback)

# Solve only if user code was OK; record the failure, never abort.
pipeflow_error = None
if not user_code_error:
    try:
        import pandapipes as pp
        pp.pipeflow(net)
    except Exception as e:
        pipeflow_error = f"{type(e).__name__}: {e}"

def to_records(df):
    try:
        import numpy as np
        nan = np.nan
    except Exception:
        nan = None
    if df is None:
        return []
    try:
        return df.reset_index().replace({nan: None}).to_dict(orient='records')
    except Exception:
        try:
            return df.reset_index().to_dict(orient='records')
        except Exception:
            return []

def table(obj, name):
    return to_records(getattr(obj, name, None))

artifacts = {}
try:
    nd = globals().get('net', object())
    kinds = ['junction', 'pipe', 'sink', 'source', 'ext_grid', 'valve',
             'compressor', 'pump', 'heat_exchanger']
    design = {k: table(nd, k) for k in kinds}
    results = {k: table(nd, 'res_' + k) for k in kinds}
    pressures = [r.get('p_bar') for r in results['junction'] if r.get('p_bar') is not None]
    velocities = [r.get('v_mean_m_per_s') for r in results['pipe'] if r.get('v_mean_m_per_s') is not None]
    summary = {
        'node_count': len(design['junction']),
        'pipe_count': len(design['pipe']),
        'min_p_bar': min(pressures) if pressures else None,
        'max_p_bar': max(pressures) if pressures else None,
        'max_v_m_per_s': max(velocities) if velocities else None,
    }
    artifacts = {'design': design, 'results': results, 'summary': summary}
except Exception as e:
    artifacts = {'error': f'extract_failed: {type(e).__name__}: {e}'}

# Carry errors forward for the parent to decide success/failure.
artifacts['pipeflow_error'] = pipeflow_error
artifacts['user_code_error'] = user_code_error
artifacts['user_error'] = user_error
artifacts['user_error_line'] = user_error_line
artifacts['user_traceback'] = user_traceback

print("@SENTINEL@" + json.dumps(artifacts))
"#;

/// Instantiate the harness with the user source embedded as a quoted
/// literal. JSON string escaping is valid Python string escaping, so the
/// user code round-trips byte-exactly into the child.
pub fn render_harness(user_code: &str) -> String {
    let literal =
        serde_json::to_string(user_code).unwrap_or_else(|_| "\"\"".to_string());
    HARNESS_TEMPLATE
        .replace(USER_CODE_SLOT, &literal)
        .replace(FILENAME_SLOT, USER_CODE_FILENAME)
        .replace(SENTINEL_SLOT, SENTINEL)
}
